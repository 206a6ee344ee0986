//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了键计算命令的实现。

use super::KeyArgs;
use crate::config::Config;
use crate::key::{KeyBuilder, Params};
use anyhow::{bail, Result};
use serde_json::Value;

pub fn execute(config: &Config, args: &KeyArgs) -> Result<()> {
    let builder = KeyBuilder::with_secret_fields(&config.keys.secret_fields)?;

    let mut params = Params::new();
    for raw in &args.params {
        let (name, value) = parse_param(raw)?;
        if builder.is_secret(&name) {
            eprintln!("⚠️  excluded secret parameter: {}", name);
        }
        params.insert(name, value);
    }

    let key = match &args.identity {
        Some(identity) => builder.build_scoped(identity, &args.name, &params),
        None => builder.build(&args.name, &params),
    };
    println!("{}", key);
    Ok(())
}

/// 解析 `name=value`；值能按 JSON 解析时使用 JSON，否则视为字符串
pub fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("parameter '{}' must be of the form NAME=VALUE", raw);
    };
    if name.is_empty() {
        bail!("parameter '{}' has an empty name", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
