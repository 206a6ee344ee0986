//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::config::Config;
use crate::manager::CacheManager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tiercache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Path to the TOML configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "key", about = "Print the canonical cache key for a resource")]
    Key(KeyArgs),

    #[command(name = "list", about = "List persisted entries")]
    List(NamespaceArgs),

    #[command(name = "inspect", about = "Show a persisted entry")]
    Inspect(InspectArgs),

    #[command(name = "purge", about = "Delete expired persisted entries")]
    Purge(NamespaceArgs),

    #[command(name = "clear", about = "Delete all entries of a namespace")]
    Clear(ClearArgs),
}

/// 门面命名空间
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Instant,
    Warm,
    Session,
    All,
}

#[derive(Parser, Debug)]
pub struct KeyArgs {
    #[arg(help = "Logical resource name, e.g. buildings/issues")]
    pub name: String,

    #[arg(
        short,
        long = "param",
        value_name = "NAME=VALUE",
        help = "Request parameter (repeatable)"
    )]
    pub params: Vec<String>,

    #[arg(short, long, help = "Prefix the key with a user identity")]
    pub identity: Option<String>,
}

#[derive(Parser, Debug)]
pub struct NamespaceArgs {
    #[arg(short, long, value_enum, default_value = "all", help = "Namespace to operate on")]
    pub namespace: Namespace,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    #[arg(help = "Cache key as printed by `list`")]
    pub key: String,

    #[arg(short, long, value_enum, default_value = "warm", help = "Namespace of the key")]
    pub namespace: Namespace,
}

#[derive(Parser, Debug)]
pub struct ClearArgs {
    #[arg(short, long, value_enum, help = "Namespace to clear")]
    pub namespace: Namespace,

    #[arg(short = 'y', long, help = "Skip confirmation")]
    pub yes: bool,
}

mod admin;
mod key;

pub use key::parse_param;

/// 读取配置：显式路径优先，否则使用默认配置
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    if let Commands::Key(args) = &cli.command {
        return key::execute(&config, args);
    }

    let manager = CacheManager::init(config)
        .await
        .context("failed to open the durable store")?;

    let result = match &cli.command {
        Commands::Key(_) => Ok(()),
        Commands::List(args) => admin::execute_list(&manager, args).await,
        Commands::Inspect(args) => admin::execute_inspect(&manager, args).await,
        Commands::Purge(args) => admin::execute_purge(&manager, args).await,
        Commands::Clear(args) => admin::execute_clear(&manager, args).await,
    };

    manager.shutdown().await?;
    result
}
