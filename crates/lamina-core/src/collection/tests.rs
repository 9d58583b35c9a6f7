//! Tests for the `collection` module.

use std::time::Duration;

use super::*;
use crate::column::ColumnSpec;
use crate::sink::ChannelSink;

#[test]
fn test_create_column_is_idempotent_per_kind() {
    let c = Collection::new();
    c.create_column("age", ColumnSpec::i32()).unwrap();
    c.create_column("age", ColumnSpec::i32()).unwrap();
    let err = c.create_column("age", ColumnSpec::f64()).unwrap_err();
    assert!(matches!(err, Error::SchemaConflict(_)));
}

#[test]
fn test_reserved_and_oversized_names_rejected() {
    let c = Collection::new();
    assert!(c.create_column("", ColumnSpec::i32()).is_err());
    let long = "x".repeat(300);
    assert!(c.create_column(&long, ColumnSpec::i32()).is_err());
}

#[test]
fn test_single_primary_key() {
    let c = Collection::new();
    c.create_column("id", ColumnSpec::key()).unwrap();
    let err = c.create_column("id2", ColumnSpec::key()).unwrap_err();
    assert!(matches!(err, Error::SchemaConflict(_)));
}

#[test]
fn test_insert_reuses_freed_slots() {
    let c = Collection::new();
    c.create_column("v", ColumnSpec::i64()).unwrap();
    let a = c.insert(|row| row.set_i64("v", 1)).unwrap();
    let b = c.insert(|row| row.set_i64("v", 2)).unwrap();
    assert_eq!((a, b), (0, 1));

    c.delete_at(0).unwrap();
    assert_eq!(c.count(), 1);
    let again = c.insert(|row| row.set_i64("v", 3)).unwrap();
    assert_eq!(again, 0);
    assert_eq!(c.count(), 2);
}

#[test]
fn test_failed_insert_releases_allocation() {
    let c = Collection::new();
    c.create_column("v", ColumnSpec::i64()).unwrap();
    let result = c.insert(|row| {
        row.set_i64("v", 1)?;
        Err(Error::NotFound(0))
    });
    assert!(result.is_err());
    assert_eq!(c.count(), 0);
    assert_eq!(c.insert(|row| row.set_i64("v", 2)).unwrap(), 0);
}

#[test]
fn test_query_at_missing_row() {
    let c = Collection::new();
    c.create_column("v", ColumnSpec::i64()).unwrap();
    let err = c.query_at(5, |_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::NotFound(5)));
}

#[test]
fn test_keyed_operations() {
    let c = Collection::new();
    c.create_column("id", ColumnSpec::key()).unwrap();
    c.create_column("v", ColumnSpec::i64()).unwrap();

    c.insert_key(10, |row| row.set_i64("v", 1)).unwrap();
    c.insert_key(20, |row| row.set_i64("v", 2)).unwrap();

    c.query_key(20, |row| {
        assert_eq!(row.i64("v")?, Some(2));
        assert_eq!(row.key("id")?, Some(20));
        Ok(())
    })
    .unwrap();

    assert!(matches!(
        c.query_key(99, |_| Ok(())),
        Err(Error::UnknownKey(99))
    ));

    c.delete_key(10).unwrap();
    assert!(matches!(c.query_key(10, |_| Ok(())), Err(Error::UnknownKey(10))));
    assert_eq!(c.count(), 1);
}

#[test]
fn test_keyed_operations_require_pk() {
    let c = Collection::new();
    c.create_column("v", ColumnSpec::i64()).unwrap();
    assert!(matches!(
        c.query_key(1, |_| Ok(())),
        Err(Error::MissingPrimaryKey)
    ));
    assert!(matches!(
        c.insert_key(1, |_| Ok(())),
        Err(Error::MissingPrimaryKey)
    ));
}

#[test]
fn test_duplicate_key_aborts_whole_transaction() {
    let c = Collection::new();
    c.create_column("id", ColumnSpec::key()).unwrap();
    c.create_column("v", ColumnSpec::i64()).unwrap();
    for key in [1, 2, 3] {
        c.insert_key(key, |row| row.set_i64("v", key)).unwrap();
    }

    let err = c.insert_key(2, |row| row.set_i64("v", 99)).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(2)));
    assert_eq!(c.count(), 3);
    // The aborted transaction staged no value.
    c.query_key(2, |row| {
        assert_eq!(row.i64("v")?, Some(2));
        Ok(())
    })
    .unwrap();

    // Re-keying an existing row onto a taken key fails too.
    let err = c.query_key(1, |row| row.set_key(2)).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(2)));
}

#[test]
fn test_key_is_reusable_after_delete() {
    let c = Collection::new();
    c.create_column("id", ColumnSpec::key()).unwrap();
    c.insert_key(7, |_| Ok(())).unwrap();
    c.delete_key(7).unwrap();
    c.insert_key(7, |_| Ok(())).unwrap();
    assert_eq!(c.count(), 1);
}

#[test]
fn test_upsert_inserts_then_updates() {
    let c = Collection::new();
    c.create_column("id", ColumnSpec::key()).unwrap();
    c.create_column("v", ColumnSpec::i64()).unwrap();

    let a = c.upsert_key(5, |row| row.set_i64("v", 1)).unwrap();
    let b = c.upsert_key(5, |row| row.set_i64("v", 2)).unwrap();
    assert_eq!(a, b);
    assert_eq!(c.count(), 1);
    c.query_key(5, |row| {
        assert_eq!(row.i64("v")?, Some(2));
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_create_index_backfills_existing_rows() {
    let c = Collection::new();
    c.create_column("age", ColumnSpec::i32()).unwrap();
    for age in [10, 20, 30, 40] {
        c.insert(|row| row.set_i32("age", age)).unwrap();
    }
    c.create_index("adult", "age", |r| r.int() >= 18).unwrap();
    c.query(|txn| {
        assert_eq!(txn.with(&["adult"]).count(), 3);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_index_tracks_updates_and_deletes() {
    let c = Collection::new();
    c.create_column("age", ColumnSpec::i32()).unwrap();
    c.create_index("adult", "age", |r| r.int() >= 18).unwrap();

    let idx = c.insert(|row| row.set_i32("age", 10)).unwrap();
    c.query_at(idx, |row| {
        assert!(!row.bool("adult")?);
        Ok(())
    })
    .unwrap();

    c.query_at(idx, |row| row.set_i32("age", 21)).unwrap();
    c.query_at(idx, |row| {
        assert!(row.bool("adult")?);
        Ok(())
    })
    .unwrap();

    c.delete_at(idx).unwrap();
    c.query(|txn| {
        assert_eq!(txn.with(&["adult"]).count(), 0);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_create_index_requires_target() {
    let c = Collection::new();
    assert!(matches!(
        c.create_index("i", "ghost", |_| true),
        Err(Error::UnknownColumn(_))
    ));
}

#[test]
fn test_drop_column_drops_dependent_indices() {
    let c = Collection::new();
    c.create_column("age", ColumnSpec::i32()).unwrap();
    c.create_index("adult", "age", |r| r.int() >= 18).unwrap();
    c.drop_column("age").unwrap();
    assert!(c.column_names().is_empty());
}

#[test]
fn test_drop_index_keeps_target() {
    let c = Collection::new();
    c.create_column("age", ColumnSpec::i32()).unwrap();
    c.create_index("adult", "age", |r| r.int() >= 18).unwrap();
    c.drop_index("adult").unwrap();
    assert_eq!(c.column_names(), vec!["age".to_string()]);
    // Dropping a data column through drop_index is refused.
    assert!(matches!(c.drop_index("age"), Err(Error::SchemaConflict(_))));
}

#[test]
fn test_replay_deduplicates_by_commit_id() {
    let primary = Collection::new();
    primary.create_column("n", ColumnSpec::i64()).unwrap();
    let (sink, rx) = ChannelSink::bounded(64);
    primary.attach_sink(sink);

    let idx = primary.insert(|row| row.set_i64("n", 5)).unwrap();
    primary.query_at(idx, |row| row.merge_i64("n", 3)).unwrap();

    let replica = Collection::new();
    replica.create_column("n", ColumnSpec::i64()).unwrap();
    let commits: Vec<_> = rx.try_iter().collect();
    for commit in &commits {
        replica.replay(commit).unwrap();
    }
    replica
        .query_at(idx, |row| {
            assert_eq!(row.i64("n")?, Some(8));
            Ok(())
        })
        .unwrap();

    // Redelivery: the merge must not double-apply.
    for commit in &commits {
        replica.replay(commit).unwrap();
    }
    replica
        .query_at(idx, |row| {
            assert_eq!(row.i64("n")?, Some(8));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_replay_drops_unknown_columns() {
    let primary = Collection::new();
    primary.create_column("a", ColumnSpec::i64()).unwrap();
    primary.create_column("b", ColumnSpec::i64()).unwrap();
    let (sink, rx) = ChannelSink::bounded(16);
    primary.attach_sink(sink);
    primary
        .insert(|row| {
            row.set_i64("a", 1)?;
            row.set_i64("b", 2)
        })
        .unwrap();

    // The replica only knows column "a"; the "b" buffer is dropped.
    let replica = Collection::new();
    replica.create_column("a", ColumnSpec::i64()).unwrap();
    for commit in rx.try_iter() {
        replica.replay(&commit).unwrap();
    }
    assert_eq!(replica.count(), 1);
    replica
        .query_at(0, |row| {
            assert_eq!(row.i64("a")?, Some(1));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_trigger_column_invokes_callback() {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    let total = Arc::new(AtomicI64::new(0));
    let sink = Arc::clone(&total);
    let c = Collection::new();
    c.create_column(
        "audit",
        ColumnSpec::trigger(move |r| {
            sink.fetch_add(r.int(), Ordering::SeqCst);
        }),
    )
    .unwrap();

    c.insert(|row| row.set_i64("audit", 40)).unwrap();
    c.insert(|row| row.set_i64("audit", 2)).unwrap();
    assert_eq!(total.load(Ordering::SeqCst), 42);

    // Triggers hold no state.
    c.query_at(0, |row| {
        assert!(row.any("audit")?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_expiration_sweep_deletes_due_rows() {
    let c = Collection::with_options(&Options::new().with_expiration(Duration::from_millis(20)));
    c.create_column("v", ColumnSpec::i64()).unwrap();

    c.insert(|row| {
        row.set_i64("v", 1)?;
        row.set_ttl(Duration::from_millis(1))
    })
    .unwrap();
    c.insert(|row| {
        row.set_i64("v", 2)?;
        row.set_ttl(Duration::from_secs(3600))
    })
    .unwrap();
    c.insert(|row| row.set_i64("v", 3)).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while c.count() > 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(c.count(), 2);
}

#[test]
fn test_ttl_reports_remaining() {
    let c = Collection::with_options(&Options::new().with_expiration(Duration::from_secs(3600)));
    let idx = c.insert(|row| row.set_ttl(Duration::from_secs(60))).unwrap();
    c.query_at(idx, |row| {
        let remaining = row.ttl()?.unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(50));
        Ok(())
    })
    .unwrap();
}
