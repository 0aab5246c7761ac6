// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic quota-engine usage.
//!
//! Demonstrates:
//! 1. Loading usage (SQLite usage cache, falling back to a storage scan)
//! 2. Establishing a small quota
//! 3. Writing through connections until older origins get evicted
//! 4. Displaying usage, pressure and metrics
//! 5. Clean reset (stores usage back into the cache)
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use quota_engine::{GroupKey, InMemoryStorage, OriginKey, QuotaConfig, QuotaManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quota_engine=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n=== quota-engine: basic usage ===\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Load usage
    // ─────────────────────────────────────────────────────────────────────────
    let cache_path = std::env::temp_dir().join("quota_engine_demo.db");
    let storage = Arc::new(InMemoryStorage::new());

    let config = QuotaConfig {
        group_limit_fraction: 0.5,
        min_group_limit_bytes: 0,
        cache_path: Some(cache_path.to_string_lossy().into_owned()),
        ..Default::default()
    };
    let manager = Arc::new(
        QuotaManager::new(config, storage.clone())
            .with_scanner(storage.clone())
            .with_configured_cache()
            .await?,
    );

    manager.init().await?;
    println!("State after init: {}", manager.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Quota
    // ─────────────────────────────────────────────────────────────────────────
    manager.init_temporary_storage(4096).await?;
    println!("State after limit: {}\n", manager.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Writes
    // ─────────────────────────────────────────────────────────────────────────
    let sites = ["alpha", "beta", "gamma", "delta", "epsilon"];
    for site in sites {
        let origin = OriginKey::new(format!("https://{site}.example"));
        let group = GroupKey::new(format!("{site}.example"));
        manager.initialize_temporary_origin(&group, &origin, true).await?;

        let conn = manager.open(&origin).await?;
        match conn.write(&[0u8; 1200]).await {
            Ok(()) => println!("  {origin}: wrote 1200 bytes"),
            Err(e) if e.is_insufficient_space() => println!("  {origin}: rejected ({})", e.code()),
            Err(e) => return Err(e.into()),
        }
        conn.close().await?;

        let report = manager.usage_report().await;
        println!(
            "    total={} origins={} pressure={}",
            report.total_usage,
            report.origins,
            report.pressure.map(|p| p.to_string()).unwrap_or_default()
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Surviving origins and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\nSurviving origins:");
    for site in sites {
        let origin = OriginKey::new(format!("https://{site}.example"));
        if let Some(record) = manager.origin_record(&origin).await? {
            println!("  {} {} bytes, last access {}", record.origin_key, record.usage_bytes, record.last_access_time);
        }
    }

    println!("\nMetrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Reset
    // ─────────────────────────────────────────────────────────────────────────
    manager.reset().await?;
    println!("\nState after reset: {}", manager.state());
    let _ = std::fs::remove_file(&cache_path);

    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let name = if labels.is_empty() {
                key.name().to_string()
            } else {
                format!("{}{{{}}}", key.name(), labels.join(","))
            };
            match value {
                DebugValue::Counter(v) => format!("  counter   {name} = {v}"),
                DebugValue::Gauge(v) => format!("  gauge     {name} = {:.0}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("  histogram {name} count={}", samples.len()),
            }
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("  (no metrics recorded)");
    }
    for line in lines {
        println!("{line}");
    }
}
