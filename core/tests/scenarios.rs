//! End-to-end scenarios with literal values, mirroring the acceptance
//! scenarios used to validate this engine.

use std::sync::Arc;

use lakehouse_core::checkpoint::CheckpointOptions;
use lakehouse_core::filter::Filter;
use lakehouse_core::read::QueryOptions;
use lakehouse_core::storage::{ObjectStoreBackend, StorageBackend};
use lakehouse_core::table::Table;
use lakehouse_core::variant::Value;
use lakehouse_core::vacuum::VacuumOptions;
use lakehouse_core::write::WriteOptions;
use serde_json::json;
use test_utils::{int_row, row, table_root, write_orphan_file, write_raw_commit};

fn field(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(name).cloned(),
        _ => None,
    }
}

#[tokio::test]
async fn s1_basic_write_and_read() {
    let storage = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::memory::InMemory::new(),
    )));
    let root = table_root("s1");
    let table = Table::new(storage, root);

    let rows = vec![
        row(vec![("id", Value::Int64(1)), ("name", Value::String("Alice".into()))]),
        row(vec![("id", Value::Int64(2)), ("name", Value::String("Bob".into()))]),
    ];

    let version = table.write(rows, WriteOptions::default()).await.unwrap();
    assert_eq!(version, 0);

    let snapshot = table.snapshot(None).await.unwrap();
    assert_eq!(snapshot.num_files(), 1);
    let file = snapshot.files().next().unwrap();
    let stats = lakehouse_core::actions::stats::FileStats::from_json_str(
        file.stats.as_ref().unwrap(),
    )
    .unwrap();
    assert_eq!(stats.num_records, 2);
    assert_eq!(stats.min_values["id"], json!(1));
    assert_eq!(stats.max_values["id"], json!(2));
    assert_eq!(stats.null_count["id"], 0);

    let all_rows = table.query(None, &QueryOptions::default()).await.unwrap();
    assert_eq!(all_rows.len(), 2);

    let filter = Filter::Gt("id".to_string(), json!(1));
    let filtered = table.query(Some(&filter), &QueryOptions::default()).await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(field(&filtered[0], "name"), Some(Value::String("Bob".to_string())));
}

#[tokio::test]
async fn s2_optimistic_conflict_then_refresh_and_retry() {
    let object_store = Arc::new(object_store::memory::InMemory::new());
    let storage = Arc::new(ObjectStoreBackend::new(object_store));
    let root = table_root("s2");

    let h1 = Table::new(storage.clone(), root.clone());
    let version0 = h1.write(vec![int_row(vec![("id", 1)])], WriteOptions::default()).await.unwrap();
    assert_eq!(version0, 0);

    // H2 reads the table at version 0 and caches that as its last-seen version.
    let h2_seen_version = version0;

    // An external writer commits version 1 directly, bypassing H2 entirely —
    // this is the race H2's next write must detect.
    let external_actions = vec![
        lakehouse_core::actions::LogAction::Add(test_utils::add_action("external.parquet", 1)),
        lakehouse_core::actions::LogAction::CommitInfo(lakehouse_core::actions::CommitInfo {
            timestamp: 0,
            operation: "WRITE".to_string(),
            operation_parameters: None,
            read_version: Some(0),
            isolation_level: None,
            is_blind_append: Some(true),
        }),
    ];
    write_raw_commit(storage.as_ref(), &root, 1, &external_actions).await.unwrap();

    // H2 attempts to commit against its stale cached version: it must lose.
    let controller = lakehouse_core::concurrency::ConcurrencyController::new(storage.as_ref(), root.clone());
    let write_actions = vec![
        lakehouse_core::actions::LogAction::Add(test_utils::add_action("h2.parquet", 1)),
        lakehouse_core::actions::LogAction::CommitInfo(lakehouse_core::actions::CommitInfo {
            timestamp: 0,
            operation: "WRITE".to_string(),
            operation_parameters: None,
            read_version: Some(0),
            isolation_level: None,
            is_blind_append: Some(true),
        }),
    ];
    let conflict = controller.commit(h2_seen_version, &write_actions).await;
    assert!(matches!(
        conflict,
        Err(lakehouse_core::Error::Concurrency { expected_version: Some(0), actual_version: 1 })
    ));

    // After refreshing, H2 retries against the true latest version and succeeds.
    let refreshed = controller.refresh_version().await.unwrap();
    assert_eq!(refreshed, 1);
    let next_version = controller.commit(refreshed, &write_actions).await.unwrap();
    assert_eq!(next_version, 2);
}

#[tokio::test]
async fn s3_partition_pruning() {
    let storage = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::memory::InMemory::new(),
    )));
    let root = table_root("s3");
    let table = Table::new(storage, root);

    let rows = vec![
        row(vec![("id", Value::Int64(1)), ("year", Value::Int64(2024))]),
        row(vec![("id", Value::Int64(2)), ("year", Value::Int64(2024))]),
        row(vec![("id", Value::Int64(3)), ("year", Value::Int64(2025))]),
        row(vec![("id", Value::Int64(4)), ("year", Value::Int64(2025))]),
    ];
    table
        .write(
            rows,
            WriteOptions::default().with_partition_columns(vec!["year".to_string()]),
        )
        .await
        .unwrap();

    let snapshot = table.snapshot(None).await.unwrap();
    assert_eq!(snapshot.num_files(), 2);
    assert!(snapshot.files().any(|f| f.path.starts_with("year=2024/")));
    assert!(snapshot.files().any(|f| f.path.starts_with("year=2025/")));

    let filter = Filter::Eq("year".to_string(), json!(2024));
    let results = table.query(Some(&filter), &QueryOptions::default()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(table.last_query_skipped_files(), 1);
}

#[tokio::test]
async fn s4_checkpoint_recovery_survives_corrupted_commit() {
    let object_store = Arc::new(object_store::memory::InMemory::new());
    let storage = Arc::new(ObjectStoreBackend::new(object_store));
    let root = table_root("s4");
    let table = Table::new(
        storage.clone(),
        root.clone(),
    )
    .with_checkpoint_options(CheckpointOptions::default());

    for i in 0..10 {
        table
            .write(vec![int_row(vec![("id", i)])], WriteOptions::default())
            .await
            .unwrap();
    }

    let last_checkpoint = lakehouse_core::checkpoint::read_last_checkpoint(storage.as_ref(), &root)
        .await
        .unwrap()
        .expect("checkpoint pointer should exist after 10 commits");
    assert_eq!(last_checkpoint.version, 9);

    // Corrupt commit file 5 directly in storage.
    let corrupt_path = lakehouse_core::path::commit_path(&root, 5);
    storage
        .write(&corrupt_path, bytes::Bytes::from_static(b"not json at all"))
        .await
        .unwrap();

    let fresh_table = Table::new(storage, root);
    let snapshot = fresh_table.snapshot(None).await.unwrap();
    assert_eq!(snapshot.version, 9);
    assert_eq!(snapshot.num_files(), 10);
}

#[tokio::test]
async fn s5_retry_success_with_exact_delay_schedule() {
    use lakehouse_core::retry::{with_retry, RetryConfig, RetryHooks};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    let config = RetryConfig {
        max_retries: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(10_000),
        multiplier: 2.0,
        jitter: false,
        jitter_factor: 0.0,
        is_retryable: None,
    };

    let attempt = AtomicU32::new(0);
    let outcome = with_retry(
        || {
            let n = attempt.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(lakehouse_core::Error::Concurrency {
                        expected_version: Some(0),
                        actual_version: 1,
                    })
                } else {
                    Ok::<_, lakehouse_core::Error>("payload")
                }
            }
        },
        &config,
        RetryHooks::default(),
    )
    .await
    .ok()
    .unwrap();

    assert_eq!(outcome.value, "payload");
    assert_eq!(outcome.metrics.attempts, 3);
    assert_eq!(outcome.metrics.delays_ms, vec![100, 200]);
}

#[tokio::test]
async fn s6_vacuum_dry_run_then_real() {
    let object_store = Arc::new(object_store::memory::InMemory::new());
    let storage = Arc::new(ObjectStoreBackend::new(object_store));
    let root = table_root("s6");
    let table = Table::new(storage.clone(), root.clone());

    table
        .write(
            vec![int_row(vec![("id", 1)]), int_row(vec![("id", 2)]), int_row(vec![("id", 3)])],
            WriteOptions::default(),
        )
        .await
        .unwrap();
    table
        .write(
            vec![int_row(vec![("id", 4)]), int_row(vec![("id", 5)]), int_row(vec![("id", 6)])],
            WriteOptions::default(),
        )
        .await
        .unwrap();

    for i in 0..5 {
        write_orphan_file(storage.as_ref(), &root, &format!("orphan-{i}.parquet"), b"orphan")
            .await
            .unwrap();
    }

    // `InMemory` stamps real wall-clock last-modified times on every write,
    // so a `now` far in the future makes the retention window's cutoff sit
    // well past those timestamps, putting every unreferenced file in scope.
    let now_ms: i64 = chrono::Utc::now().timestamp_millis() + (400 * 3_600_000);

    let dry_run_opts = VacuumOptions {
        retention_hours: 168.0,
        dry_run: true,
    };
    let dry_run_result = table.vacuum(&dry_run_opts, now_ms).await.unwrap();
    assert_eq!(dry_run_result.files_deleted, 5);
    assert_eq!(dry_run_result.files_to_delete.len(), 5);

    let real_opts = VacuumOptions {
        retention_hours: 168.0,
        dry_run: false,
    };
    let real_result = table.vacuum(&real_opts, now_ms).await.unwrap();
    assert_eq!(real_result.files_deleted, 5);

    let snapshot = table.snapshot(None).await.unwrap();
    assert_eq!(snapshot.num_files(), 2);
}

#[tokio::test]
async fn s7_delete_drops_matching_rows_and_rewrites_partial_files() {
    let storage = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::memory::InMemory::new(),
    )));
    let root = table_root("s7");
    let table = Table::new(storage, root);

    table
        .write(
            vec![
                int_row(vec![("id", 1)]),
                int_row(vec![("id", 2)]),
                int_row(vec![("id", 3)]),
            ],
            WriteOptions::default(),
        )
        .await
        .unwrap();
    table
        .write(vec![int_row(vec![("id", 4)])], WriteOptions::default())
        .await
        .unwrap();

    // Fully matches the second file, partially matches the first.
    let filter = Filter::Gt("id".to_string(), json!(2));
    let version = table.delete(&filter).await.unwrap();
    assert!(version > 1);

    let remaining = table.query(None, &QueryOptions::default()).await.unwrap();
    let ids: Vec<i64> = remaining
        .iter()
        .filter_map(|v| match field(v, "id") {
            Some(Value::Int64(i)) => Some(i),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&1));
    assert!(ids.contains(&2));

    // Deleting again with a filter matching nothing is a no-op commit.
    let unchanged = table.delete(&Filter::Eq("id".to_string(), json!(999))).await.unwrap();
    assert_eq!(unchanged, version);
}

#[tokio::test]
async fn s8_update_patches_matching_rows_in_place() {
    let storage = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::memory::InMemory::new(),
    )));
    let root = table_root("s8");
    let table = Table::new(storage, root);

    table
        .write(
            vec![
                row(vec![("id", Value::Int64(1)), ("status", Value::String("pending".into()))]),
                row(vec![("id", Value::Int64(2)), ("status", Value::String("pending".into()))]),
            ],
            WriteOptions::default(),
        )
        .await
        .unwrap();

    let patch = row(vec![("status", Value::String("done".into()))]);
    let filter = Filter::Eq("id".to_string(), json!(1));
    table.update(&filter, &patch).await.unwrap();

    let rows = table.query(None, &QueryOptions::default()).await.unwrap();
    for r in rows {
        let id = field(&r, "id");
        let status = field(&r, "status");
        if id == Some(Value::Int64(1)) {
            assert_eq!(status, Some(Value::String("done".to_string())));
        } else {
            assert_eq!(status, Some(Value::String("pending".to_string())));
        }
    }
}

#[tokio::test]
async fn s9_time_travel_query_options_pin_a_version() {
    let storage = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::memory::InMemory::new(),
    )));
    let root = table_root("s9");
    let table = Table::new(storage, root);

    table.write(vec![int_row(vec![("id", 1)])], WriteOptions::default()).await.unwrap();
    table.write(vec![int_row(vec![("id", 2)])], WriteOptions::default()).await.unwrap();

    let pinned = QueryOptions {
        version: Some(0),
        ..QueryOptions::default()
    };
    let old_rows = table.query(None, &pinned).await.unwrap();
    assert_eq!(old_rows.len(), 1);

    let latest_rows = table.query(None, &QueryOptions::default()).await.unwrap();
    assert_eq!(latest_rows.len(), 2);

    let snapshot_zero = table.snapshot(Some(0)).await.unwrap();
    let pinned_by_snapshot = QueryOptions {
        snapshot: Some(snapshot_zero),
        ..QueryOptions::default()
    };
    let via_snapshot = table.query(None, &pinned_by_snapshot).await.unwrap();
    assert_eq!(via_snapshot.len(), 1);

    let conflicting = QueryOptions {
        version: Some(0),
        snapshot: Some(table.snapshot(Some(1)).await.unwrap()),
        ..QueryOptions::default()
    };
    assert!(table.query(None, &conflicting).await.is_err());
}

#[tokio::test]
async fn s10_query_iterator_streams_rows_lazily() {
    use futures::StreamExt;

    let storage = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::memory::InMemory::new(),
    )));
    let root = table_root("s10");
    let table = Table::new(storage, root);

    table
        .write(
            vec![int_row(vec![("id", 1)]), int_row(vec![("id", 2)])],
            WriteOptions::default(),
        )
        .await
        .unwrap();
    table.write(vec![int_row(vec![("id", 3)])], WriteOptions::default()).await.unwrap();

    let stream = table.query_iterator(None, &QueryOptions::default()).await.unwrap();
    tokio::pin!(stream);

    let mut collected = Vec::new();
    while let Some(item) = stream.next().await {
        collected.push(item.unwrap());
    }
    assert_eq!(collected.len(), 3);
}

#[tokio::test]
async fn s11_generic_commit_accepts_a_custom_action_list() {
    use lakehouse_core::actions::{CommitInfo, LogAction};

    let storage = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::memory::InMemory::new(),
    )));
    let root = table_root("s11");
    let table = Table::new(storage, root);

    table.write(vec![int_row(vec![("id", 1)])], WriteOptions::default()).await.unwrap();

    let actions = vec![LogAction::CommitInfo(CommitInfo {
        timestamp: 0,
        operation: "MANUAL MAINTENANCE".to_string(),
        operation_parameters: None,
        read_version: Some(0),
        isolation_level: None,
        is_blind_append: Some(true),
    })];
    let version = table.commit(actions).await.unwrap();
    assert_eq!(version, 1);

    let snapshot = table.snapshot(None).await.unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.num_files(), 1);
}

#[tokio::test]
async fn s12_vacuum_reports_full_result_shape_and_two_phase_progress() {
    let object_store = Arc::new(object_store::memory::InMemory::new());
    let storage = Arc::new(ObjectStoreBackend::new(object_store));
    let root = table_root("s12");
    let table = Table::new(storage.clone(), root.clone());

    table.write(vec![int_row(vec![("id", 1)])], WriteOptions::default()).await.unwrap();

    write_orphan_file(storage.as_ref(), &root, "orphan.parquet", b"orphan")
        .await
        .unwrap();
    write_orphan_file(storage.as_ref(), &root, "notes.txt", b"not a data file")
        .await
        .unwrap();

    let now_ms = chrono::Utc::now().timestamp_millis() + (400 * 3_600_000);
    let snapshot = table.snapshot(None).await.unwrap();

    let mut scanning_calls = 0usize;
    let mut deleting_calls = 0usize;
    let mut on_progress = |phase: &str, _index: usize, _total: usize| match phase {
        "scanning" => scanning_calls += 1,
        "deleting" => deleting_calls += 1,
        other => panic!("unexpected vacuum phase {other}"),
    };

    let result = lakehouse_core::vacuum::vacuum(
        storage.as_ref(),
        &root,
        &snapshot,
        &VacuumOptions {
            retention_hours: 168.0,
            dry_run: false,
        },
        now_ms,
        Some(&mut on_progress),
    )
    .await
    .unwrap();

    assert_eq!(result.files_deleted, 1);
    assert!(result.bytes_freed > 0);
    assert!(!result.dry_run);
    assert_eq!(result.files_to_delete, vec!["orphan.parquet".to_string()]);
    assert!(scanning_calls >= 1);
    assert_eq!(deleting_calls, 1);

    // The non-parquet file is never a vacuum candidate.
    assert!(storage.exists(&root.child("notes.txt")).await.unwrap());
}
