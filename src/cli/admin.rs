//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久层管理命令的实现。

use super::{ClearArgs, InspectArgs, Namespace, NamespaceArgs};
use crate::client::CacheAside;
use crate::clock::Clock;
use crate::manager::CacheManager;
use crate::utils::redaction::redact_cache_key;
use anyhow::{Context, Result};

fn selected<'a>(manager: &'a CacheManager, namespace: Namespace) -> Vec<&'a CacheAside> {
    match namespace {
        Namespace::Instant => vec![&**manager.instant()],
        Namespace::Warm => vec![&**manager.warm()],
        Namespace::Session => vec![&**manager.session()],
        Namespace::All => vec![&**manager.instant(), &**manager.warm(), &**manager.session()],
    }
}

pub async fn execute_list(manager: &CacheManager, args: &NamespaceArgs) -> Result<()> {
    for cache in selected(manager, args.namespace) {
        let store = cache.store();
        let now = store.clock().now();
        let entries = store
            .durable_entries()
            .await
            .with_context(|| format!("failed to list namespace '{}'", store.namespace()))?;

        println!("=== {} ({} entries) ===", store.namespace(), entries.len());
        for (key, entry) in entries {
            let status = if entry.is_fresh(now) { "fresh" } else { "expired" };
            println!(
                "  {:<60} {:<8} expires {}",
                redact_cache_key(&key),
                status,
                entry.expires_at.to_rfc3339()
            );
        }
    }
    Ok(())
}

pub async fn execute_inspect(manager: &CacheManager, args: &InspectArgs) -> Result<()> {
    if args.namespace == Namespace::All {
        anyhow::bail!("inspect needs a single namespace");
    }
    for cache in selected(manager, args.namespace) {
        let store = cache.store();
        match store.get_entry(&args.key).await? {
            Some(entry) => {
                println!("Key:        {}", args.key);
                println!("Namespace:  {}", store.namespace());
                println!("Expires at: {}", entry.expires_at.to_rfc3339());
                println!("{}", serde_json::to_string_pretty(&entry.value)?);
            }
            None => println!("No fresh entry for '{}' in '{}'", args.key, store.namespace()),
        }
    }
    Ok(())
}

pub async fn execute_purge(manager: &CacheManager, args: &NamespaceArgs) -> Result<()> {
    for cache in selected(manager, args.namespace) {
        let store = cache.store();
        let removed = store.purge_expired().await?;
        println!("{}: removed {} expired entries", store.namespace(), removed);
    }
    Ok(())
}

pub async fn execute_clear(manager: &CacheManager, args: &ClearArgs) -> Result<()> {
    let caches = selected(manager, args.namespace);

    if !args.yes {
        println!("Preparing to clear:");
        for cache in &caches {
            println!("  - {}", cache.store().namespace());
        }
        print!("\nDo you want to continue? [y/N]: ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "y" {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    for cache in caches {
        cache.store().clear_all().await?;
        println!("{} cleared.", cache.store().namespace());
    }
    Ok(())
}
