//! Read-cache gating on connectivity and the periodic housekeeping pass.

mod fixtures;

use std::sync::Arc;
use std::time::{Duration, Instant};

use habit_sync::config::{Config, ConfigLayer, apply_overrides_from, merge_layers};
use habit_sync::sync::{HousekeepingReport, StoreError, SyncError};
use habit_sync::{
    ChangeEvent, HousekeepingHandle, LocalCollection, PendingOp, PendingUpdate, Scope,
    SyncSettings,
};
use serde_json::json;

use fixtures::harness::{Harness, by_id, habits, ids, owner, record};

fn seed(harness: &Harness) -> Scope {
    harness.store.seed(
        &habits(),
        vec![
            record(json!({"id": "h1", "user_id": "u1", "name": "Read"})),
            record(json!({"id": "h2", "user_id": "u2", "name": "Swim"})),
        ],
    );
    Scope::new(habits()).filtered(owner("u1")).labeled("2024-05")
}

#[test]
fn fresh_cache_is_served_until_ttl_elapses() {
    let harness = Harness::new();
    let scope = seed(&harness);
    let ttl = harness.service.settings().cache_ttl;

    assert_eq!(ids(&harness.service.load(&scope).unwrap()), vec!["h1"]);
    assert_eq!(harness.store.fetches(), 1);

    harness.advance(ttl);
    harness.service.load(&scope).unwrap();
    assert_eq!(harness.store.fetches(), 1);

    harness.advance(Duration::from_millis(1));
    harness.service.load(&scope).unwrap();
    assert_eq!(harness.store.fetches(), 2);

    let metrics = harness.service.cache_metrics().unwrap();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.expired, 1);
}

#[test]
fn offline_reads_use_fresh_cache_and_never_expired_data() {
    let harness = Harness::new();
    let scope = seed(&harness);
    harness.service.load(&scope).unwrap();

    harness.go_offline();
    assert!(!harness.service.connectivity().status());
    assert_eq!(ids(&harness.service.load(&scope).unwrap()), vec!["h1"]);
    assert_eq!(ids(&harness.service.refresh(&scope).unwrap()), vec!["h1"]);

    harness.advance(harness.service.settings().cache_ttl + Duration::from_millis(1));
    let err = harness.service.load(&scope).unwrap_err();
    assert!(matches!(err, SyncError::Offline { .. }));
    assert!(err.transience().is_retryable());
    assert_eq!(harness.store.fetches(), 1);

    harness.go_online();
    assert_eq!(ids(&harness.service.load(&scope).unwrap()), vec!["h1"]);
    assert_eq!(harness.store.fetches(), 2);
}

#[test]
fn fetch_failure_surfaces_and_caches_nothing() {
    let harness = Harness::new();
    let scope = seed(&harness);
    harness.store.fail_next(StoreError::Unreachable {
        reason: "timeout".into(),
    });

    let err = harness.service.load(&scope).unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Unreachable { .. })));
    assert_eq!(harness.service.cache_get(&scope.cache_key()).unwrap(), None);

    harness.service.load(&scope).unwrap();
    assert_eq!(harness.store.fetches(), 2);
}

#[test]
fn loads_overlay_pending_updates_and_writes_invalidate_the_entity() {
    let harness = Harness::new();
    let scope = seed(&harness);
    harness.service.load(&scope).unwrap();

    let pending = PendingUpdate::new(
        habits(),
        PendingOp::Update {
            target: by_id("h1"),
            fields: record(json!({"name": "Read more"})),
        },
    );
    harness
        .service
        .pending_put(pending.default_key().unwrap(), pending)
        .unwrap();
    let rows = harness.service.load(&scope).unwrap();
    assert_eq!(rows[0].get("name"), Some(&json!("Read more")));
    assert_eq!(harness.store.fetches(), 1);

    let mut collection = LocalCollection::new(habits(), rows);
    harness
        .service
        .mutate(
            &mut collection,
            PendingOp::Update {
                target: by_id("h1"),
                fields: record(json!({"goal": 5})),
            },
        )
        .unwrap();
    assert_eq!(harness.service.cache_get(&scope.cache_key()).unwrap(), None);
}

#[test]
fn housekeeping_evicts_stale_pending_updates_and_expired_scopes() {
    let harness = Harness::new();
    let scope = seed(&harness);
    harness.service.load(&scope).unwrap();
    let max_age = harness.service.settings().pending_max_age;

    let pending = PendingUpdate::new(
        habits(),
        PendingOp::Delete {
            target: by_id("h1"),
        },
    );
    harness
        .service
        .pending_put(pending.default_key().unwrap(), pending)
        .unwrap();

    harness.advance(max_age);
    assert_eq!(
        harness.service.housekeep().unwrap(),
        HousekeepingReport::default()
    );
    assert_eq!(harness.service.pending_len().unwrap(), 1);

    harness.advance(Duration::from_millis(1));
    let report = harness.service.housekeep().unwrap();
    assert_eq!(report.pending_evicted, 1);
    assert_eq!(report.cache_evicted, 0);

    harness.advance(harness.service.settings().cache_ttl);
    let report = harness.service.housekeep().unwrap();
    assert_eq!(report.pending_evicted, 0);
    assert_eq!(report.cache_evicted, 1);
}

#[test]
fn background_worker_runs_on_demand_and_shuts_down() {
    let harness = Harness::new();
    let pending = PendingUpdate::new(
        habits(),
        PendingOp::Delete {
            target: by_id("h1"),
        },
    );
    harness
        .service
        .pending_put(pending.default_key().unwrap(), pending)
        .unwrap();
    harness.advance(harness.service.settings().pending_max_age + Duration::from_secs(1));

    let worker =
        HousekeepingHandle::start(harness.service.clone(), Duration::from_secs(3600)).unwrap();
    worker.run_now();

    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.service.pending_len().unwrap() > 0 {
        assert!(Instant::now() < deadline, "housekeeping pass never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
    worker.shutdown();
}

#[test]
fn settings_follow_layered_config() {
    let mut project = ConfigLayer::default();
    project.sync.cache_ttl_ms = Some(60_000);
    let mut config: Config = merge_layers(None, Some(project));
    apply_overrides_from(&mut config, |var| {
        (var == "HABIT_SYNC_PENDING_MAX_AGE_MS").then(|| "5000".to_string())
    });

    let settings = SyncSettings::from(&config.sync);
    assert_eq!(settings.cache_ttl, Duration::from_secs(60));
    assert_eq!(settings.pending_max_age, Duration::from_secs(5));

    let harness = Harness::with_settings(settings);
    let scope = seed(&harness);
    harness.service.load(&scope).unwrap();
    harness.advance(Duration::from_secs(61));
    harness.service.load(&scope).unwrap();
    assert_eq!(harness.store.fetches(), 2);
}

#[test]
fn change_applied_during_a_fetch_keeps_the_fetched_rows_out_of_the_cache() {
    let harness = Harness::new();
    let scope = seed(&harness);
    let renamed = record(json!({"id": "h1", "user_id": "u1", "name": "Read daily"}));

    {
        let service = Arc::clone(&harness.service);
        let store = Arc::clone(&harness.store);
        let renamed = renamed.clone();
        harness.store.during_next_fetch(move || {
            store.seed(
                &habits(),
                vec![
                    renamed.clone(),
                    record(json!({"id": "h2", "user_id": "u2", "name": "Swim"})),
                ],
            );
            let mut collection = LocalCollection::empty(habits());
            service
                .apply_change(&mut collection, &ChangeEvent::update(habits(), renamed))
                .unwrap();
        });
    }

    // The in-flight result is still returned to its caller.
    let first = harness.service.load(&scope).unwrap();
    assert_eq!(first[0].get("name"), Some(&json!("Read")));
    assert_eq!(harness.service.cache_get(&scope.cache_key()).unwrap(), None);

    let second = harness.service.load(&scope).unwrap();
    assert_eq!(harness.store.fetches(), 2);
    assert_eq!(second, vec![renamed]);
}
