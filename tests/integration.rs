//! Integration Tests for the Quota Engine
//!
//! End-to-end scenarios through the public API: admission, LRU eviction,
//! liveness immunity, group ceilings and restart through the usage cache.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: admission, eviction order, restart
//! - `edge_*` - Boundaries: all-or-nothing, active origins, toggles

use std::collections::HashSet;
use std::sync::Arc;

use quota_engine::{
    GroupKey, InMemoryStorage, ManagerState, OriginKey, QuotaConfig, QuotaManager, SqliteUsageCache,
};

// =============================================================================
// Helpers
// =============================================================================

fn origin(i: usize) -> OriginKey {
    OriginKey::new(format!("https://site{i}.test"))
}

fn group(i: usize) -> GroupKey {
    GroupKey::new(format!("site{i}.test"))
}

/// Config where the group ceiling never binds before the global one.
fn flat_config() -> QuotaConfig {
    QuotaConfig {
        group_limit_fraction: 1.0,
        ..Default::default()
    }
}

async fn ready_manager(config: QuotaConfig, storage: &Arc<InMemoryStorage>, limit: u64) -> Arc<QuotaManager> {
    let manager = Arc::new(QuotaManager::new(config, storage.clone()).with_scanner(storage.clone()));
    manager.init().await.expect("init");
    manager.init_temporary_storage(limit).await.expect("limit");
    manager
}

/// Create `count` origins, each holding `bytes`, touched in index order.
async fn populate(manager: &Arc<QuotaManager>, count: usize, bytes: usize) {
    for i in 0..count {
        manager
            .initialize_temporary_origin(&group(i), &origin(i), true)
            .await
            .expect("initialize");
        let conn = manager.open(&origin(i)).await.expect("open");
        conn.write(&vec![0u8; bytes]).await.expect("write");
        conn.close().await.expect("close");
    }
}

fn unique_db_path(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("quota_engine_{}_{}.db", name, uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned()
}

fn cleanup_db(path: &str) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(format!("{path}-wal"));
    let _ = std::fs::remove_file(format!("{path}-shm"));
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn happy_open_writes_until_full_then_evicts_closed_origins() {
    const N: usize = 5;
    const LIMIT: u64 = 400;
    let per_origin = (LIMIT / (N as u64 - 1)) as usize;

    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, LIMIT).await;

    let mut connections = Vec::new();
    for i in 0..N {
        manager
            .initialize_temporary_origin(&group(i), &origin(i), true)
            .await
            .unwrap();
        connections.push(manager.open(&origin(i)).await.unwrap());
    }

    // Every origin is open, so nothing can be evicted for the last one
    for conn in &connections[..N - 1] {
        conn.write(&vec![1u8; per_origin]).await.unwrap();
    }
    let err = connections[N - 1].write(&vec![1u8; per_origin]).await.unwrap_err();
    assert!(err.is_insufficient_space());
    assert_eq!(manager.usage_report().await.total_usage, LIMIT);

    // Close all but the first and the last
    let last = connections.pop().unwrap();
    let mut rest = connections.into_iter();
    let first = rest.next().unwrap();
    for conn in rest {
        conn.close().await.unwrap();
    }

    last.write(&vec![1u8; per_origin]).await.unwrap();

    // Oldest closed origin made room; open origins untouched
    assert!(manager.origin_record(&origin(1)).await.unwrap().is_none());
    assert!(!storage.contains(&origin(1)));
    assert_eq!(manager.get_usage_for_principal(&origin(0)).await.unwrap(), per_origin as u64);
    assert_eq!(manager.get_usage_for_principal(&origin(2)).await.unwrap(), per_origin as u64);
    assert_eq!(manager.get_usage_for_principal(&origin(N - 1)).await.unwrap(), per_origin as u64);
    assert!(manager.usage_report().await.total_usage <= LIMIT);

    first.close().await.unwrap();
    last.close().await.unwrap();
}

#[tokio::test]
async fn happy_restart_with_halved_limit_evicts_oldest_half() {
    let db_path = unique_db_path("halve");
    let storage = Arc::new(InMemoryStorage::new());

    {
        let cache = Arc::new(SqliteUsageCache::new(&db_path).await.unwrap());
        let manager = Arc::new(
            QuotaManager::new(flat_config(), storage.clone())
                .with_scanner(storage.clone())
                .with_usage_cache(cache),
        );
        manager.init().await.unwrap();
        manager.init_temporary_storage(800).await.unwrap();
        populate(&manager, 8, 100).await;
        assert_eq!(manager.usage_report().await.total_usage, 800);
        manager.reset().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Uninitialized);
    }

    let cache = Arc::new(SqliteUsageCache::new(&db_path).await.unwrap());
    let manager = Arc::new(
        QuotaManager::new(flat_config(), storage.clone())
            .with_scanner(storage.clone())
            .with_usage_cache(cache),
    );
    manager.init().await.unwrap();
    assert_eq!(manager.usage_report().await.total_usage, 800);

    let report = manager.init_temporary_storage(400).await.unwrap();
    assert_eq!(report.evicted, (0..4).map(origin).collect::<Vec<_>>());
    assert_eq!(report.freed_bytes, 400);
    assert_eq!(manager.usage_report().await.total_usage, 400);
    for i in 4..8 {
        assert!(storage.contains(&origin(i)));
    }

    cleanup_db(&db_path);
}

#[tokio::test]
async fn happy_crash_without_reset_rescans_storage() {
    let db_path = unique_db_path("crash");
    let storage = Arc::new(InMemoryStorage::new());

    {
        let cache = Arc::new(SqliteUsageCache::new(&db_path).await.unwrap());
        let manager = Arc::new(
            QuotaManager::new(flat_config(), storage.clone())
                .with_scanner(storage.clone())
                .with_usage_cache(cache),
        );
        manager.init().await.unwrap();
        manager.init_temporary_storage(1000).await.unwrap();
        populate(&manager, 3, 50).await;
        // Dropped without reset(): the cache stays invalid
    }

    let cache = Arc::new(SqliteUsageCache::new(&db_path).await.unwrap());
    let manager = Arc::new(
        QuotaManager::new(flat_config(), storage.clone())
            .with_scanner(storage.clone())
            .with_usage_cache(cache),
    );
    manager.init().await.unwrap();

    // Rebuilt from storage, access order preserved
    let report = manager.usage_report().await;
    assert_eq!(report.origins, 3);
    assert_eq!(report.total_usage, 150);

    manager.init_temporary_storage(50).await.unwrap();
    assert!(!storage.contains(&origin(0)));
    assert!(!storage.contains(&origin(1)));
    assert!(storage.contains(&origin(2)));

    cleanup_db(&db_path);
}

#[tokio::test]
async fn happy_lru_order_follows_last_close() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, 300).await;
    populate(&manager, 3, 100).await;

    // Touch origin 0 again so origin 1 becomes the oldest
    let conn = manager.open(&origin(0)).await.unwrap();
    conn.close().await.unwrap();

    manager
        .initialize_temporary_origin(&group(9), &origin(9), true)
        .await
        .unwrap();
    manager.request_write_admission(&origin(9), 100).await.unwrap();

    assert!(manager.origin_record(&origin(0)).await.unwrap().is_some());
    assert!(manager.origin_record(&origin(1)).await.unwrap().is_none());
    assert!(manager.origin_record(&origin(2)).await.unwrap().is_some());
}

#[tokio::test]
async fn happy_group_limit_evicts_within_group_only() {
    let storage = Arc::new(InMemoryStorage::new());
    let config = QuotaConfig {
        group_limit_fraction: 0.2,
        min_group_limit_bytes: 0,
        ..Default::default()
    };
    let manager = ready_manager(config, &storage, 1000).await;
    let shared = GroupKey::from("shared.test");

    // Older origin in another group
    manager
        .initialize_temporary_origin(&group(0), &origin(0), true)
        .await
        .unwrap();
    manager.request_write_admission(&origin(0), 150).await.unwrap();

    let a = OriginKey::from("https://a.shared.test");
    let b = OriginKey::from("https://b.shared.test");
    manager.initialize_temporary_origin(&shared, &a, true).await.unwrap();
    manager.request_write_admission(&a, 150).await.unwrap();
    manager.initialize_temporary_origin(&shared, &b, true).await.unwrap();

    // 150 + 100 exceeds the 200 byte group ceiling
    manager.request_write_admission(&b, 100).await.unwrap();

    assert!(manager.origin_record(&a).await.unwrap().is_none());
    assert_eq!(manager.get_usage_for_principal(&origin(0)).await.unwrap(), 150);
    assert_eq!(manager.get_usage_for_group(&shared).await.unwrap(), 100);

    // A single origin can never exceed its group ceiling
    let err = manager.request_write_admission(&b, 150).await.unwrap_err();
    assert!(err.is_insufficient_space());
}

#[tokio::test]
async fn happy_default_group_ceiling_applies_floor_and_cap() {
    const MB: u64 = 1024 * 1024;
    let storage = Arc::new(InMemoryStorage::new());

    // 20% of 20 MB is under the 10 MB floor, so groups get 10 MB
    let manager = ready_manager(QuotaConfig::default(), &storage, 20 * MB).await;
    assert_eq!(manager.usage_report().await.limits.unwrap().group_bytes, 10 * MB);

    let shared = GroupKey::from("shared.test");
    let a = OriginKey::from("https://a.shared.test");
    let b = OriginKey::from("https://b.shared.test");
    manager
        .initialize_temporary_origin(&group(0), &origin(0), true)
        .await
        .unwrap();
    manager.request_write_admission(&origin(0), 6 * MB).await.unwrap();
    manager.initialize_temporary_origin(&shared, &a, true).await.unwrap();
    manager.request_write_admission(&a, 6 * MB).await.unwrap();
    manager.initialize_temporary_origin(&shared, &b, true).await.unwrap();

    // 12 MB in one group: the group's own oldest origin goes, not origin 0
    manager.request_write_admission(&b, 6 * MB).await.unwrap();
    assert!(!storage.contains(&a));
    assert!(storage.contains(&origin(0)));
    assert_eq!(manager.get_usage_for_group(&shared).await.unwrap(), 6 * MB);

    // Below the floor the group ceiling is capped at the global limit
    let report = manager.init_temporary_storage(5 * MB).await.unwrap();
    assert_eq!(manager.usage_report().await.limits.unwrap().group_bytes, 5 * MB);
    let evicted: HashSet<OriginKey> = report.evicted.into_iter().collect();
    assert_eq!(evicted, HashSet::from([origin(0), b]));

    manager
        .initialize_temporary_origin(&group(1), &origin(1), true)
        .await
        .unwrap();
    manager.request_write_admission(&origin(1), 5 * MB).await.unwrap();
    assert_eq!(manager.usage_report().await.total_usage, 5 * MB);
}

#[tokio::test]
async fn happy_resize_while_ready() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, 1000).await;
    populate(&manager, 4, 100).await;

    let report = manager.init_temporary_storage(250).await.unwrap();
    assert_eq!(report.evicted, vec![origin(0), origin(1)]);
    assert!(manager.is_ready());

    let report = manager.init_temporary_storage(5000).await.unwrap();
    assert!(report.evicted.is_empty());
}

// =============================================================================
// Edge cases
// =============================================================================

#[tokio::test]
async fn edge_all_or_nothing_leaves_ledger_untouched() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, 300).await;
    populate(&manager, 3, 100).await;
    let held = manager.open(&origin(2)).await.unwrap();

    manager
        .initialize_temporary_origin(&group(9), &origin(9), true)
        .await
        .unwrap();
    // Needs 250 freed; only 200 is evictable
    let err = manager.request_write_admission(&origin(9), 250).await.unwrap_err();
    assert!(err.is_insufficient_space());

    for i in 0..3 {
        assert!(storage.contains(&origin(i)), "origin {i} must survive a failed admission");
    }
    assert_eq!(manager.usage_report().await.total_usage, 300);
    held.close().await.unwrap();
}

#[tokio::test]
async fn edge_shrink_never_evicts_active_origins() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, 1000).await;
    populate(&manager, 3, 100).await;
    let held = manager.open(&origin(0)).await.unwrap();

    let report = manager.init_temporary_storage(50).await.unwrap();
    let evicted: HashSet<OriginKey> = report.evicted.into_iter().collect();
    assert_eq!(evicted, HashSet::from([origin(1), origin(2)]));

    // Best effort: the open origin keeps usage above the limit
    assert_eq!(manager.usage_report().await.total_usage, 100);
    assert!(storage.contains(&origin(0)));
    held.close().await.unwrap();
}

#[tokio::test]
async fn edge_connection_open_across_reset_goes_stale() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, 200).await;
    manager
        .initialize_temporary_origin(&group(0), &origin(0), true)
        .await
        .unwrap();
    let stale = manager.open(&origin(0)).await.unwrap();
    stale.write(&[0u8; 100]).await.unwrap();

    // Restart while the connection is still open; usage is rebuilt by scan
    manager.reset().await.unwrap();
    manager.init().await.unwrap();
    manager.init_temporary_storage(200).await.unwrap();
    manager
        .initialize_temporary_origin(&group(0), &origin(0), true)
        .await
        .unwrap();
    let fresh = manager.open(&origin(0)).await.unwrap();

    // Closing the old connection must not release the new one
    stale.close().await.unwrap();
    let record = manager.origin_record(&origin(0)).await.unwrap().unwrap();
    assert!(record.is_active());

    manager
        .initialize_temporary_origin(&group(1), &origin(1), true)
        .await
        .unwrap();
    let err = manager.request_write_admission(&origin(1), 150).await.unwrap_err();
    assert!(err.is_insufficient_space());
    assert!(storage.contains(&origin(0)));
    assert_eq!(manager.get_usage_for_principal(&origin(0)).await.unwrap(), 100);

    fresh.write(&[0u8; 50]).await.unwrap();
    fresh.close().await.unwrap();
    assert_eq!(manager.usage_report().await.active_origins, 0);
}

#[tokio::test]
async fn edge_access_time_disabled_falls_back_to_registration_order() {
    let storage = Arc::new(InMemoryStorage::new());
    let config = QuotaConfig {
        update_access_time: false,
        ..flat_config()
    };
    let manager = ready_manager(config, &storage, 300).await;
    populate(&manager, 3, 100).await;

    // Reverse-order touches do not change eviction order
    for i in (0..3).rev() {
        let conn = manager.open(&origin(i)).await.unwrap();
        conn.close().await.unwrap();
    }

    manager
        .initialize_temporary_origin(&group(9), &origin(9), true)
        .await
        .unwrap();
    manager.request_write_admission(&origin(9), 100).await.unwrap();
    assert!(manager.origin_record(&origin(0)).await.unwrap().is_none());
    assert!(manager.origin_record(&origin(2)).await.unwrap().is_some());
}

#[tokio::test]
async fn edge_requester_is_never_its_own_victim() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, 200).await;
    populate(&manager, 1, 150).await;

    // Origin 0 is the only candidate but it is the one asking
    let err = manager.request_write_admission(&origin(0), 100).await.unwrap_err();
    assert!(err.is_insufficient_space());
    assert_eq!(manager.get_usage_for_principal(&origin(0)).await.unwrap(), 150);
}

#[tokio::test]
async fn edge_zero_byte_admission_never_evicts() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = ready_manager(flat_config(), &storage, 100).await;
    populate(&manager, 2, 50).await;

    manager.request_write_admission(&origin(1), 0).await.unwrap();
    assert_eq!(manager.usage_report().await.origins, 2);
}

#[tokio::test]
async fn edge_state_watch_follows_lifecycle() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = QuotaManager::new(QuotaConfig::default(), storage);
    let mut rx = manager.state_receiver();

    manager.init().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), ManagerState::Initializing);

    manager.init_temporary_storage(100).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), ManagerState::Ready);
}

#[tokio::test]
async fn happy_configured_cache_path_restores_usage() {
    let db_path = unique_db_path("configured");
    let config = QuotaConfig {
        cache_path: Some(db_path.clone()),
        ..flat_config()
    };

    {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = Arc::new(
            QuotaManager::new(config.clone(), storage.clone())
                .with_configured_cache()
                .await
                .unwrap(),
        );
        manager.init().await.unwrap();
        manager.init_temporary_storage(1000).await.unwrap();
        populate(&manager, 2, 40).await;
        manager.reset().await.unwrap();
    }

    // No scanner: usage can only come from the configured cache
    let manager = QuotaManager::new(config, Arc::new(InMemoryStorage::new()))
        .with_configured_cache()
        .await
        .unwrap();
    manager.init().await.unwrap();
    assert_eq!(manager.usage_report().await.total_usage, 80);
    assert_eq!(manager.get_usage_for_principal(&origin(1)).await.unwrap(), 40);

    cleanup_db(&db_path);
}

#[tokio::test]
async fn edge_config_from_json() {
    let config: QuotaConfig = serde_json::from_str(
        r#"{"fixed_limit_bytes": 300, "group_limit_fraction": 1.0, "load_from_cache": false}"#,
    )
    .unwrap();

    let storage = Arc::new(InMemoryStorage::new());
    let manager = Arc::new(QuotaManager::new(config, storage));
    manager.init().await.unwrap();
    manager.init_temporary_storage_from_disk(1 << 30).await.unwrap();

    let limits = manager.usage_report().await.limits.unwrap();
    assert_eq!(limits.global_bytes, 300);
    assert_eq!(limits.group_bytes, 300);
}
