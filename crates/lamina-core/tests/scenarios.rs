//! End-to-end scenarios over the public API.

use lamina_core::{Collection, ColumnSpec, Error, Result};

#[test]
fn basic_insert_and_query() -> Result<()> {
    let players = Collection::new();
    players.create_column("name", ColumnSpec::string())?;
    players.create_column("age", ColumnSpec::i32())?;

    players.insert(|row| {
        row.set_string("name", "Merlin")?;
        row.set_i32("age", 55)
    })?;
    players.insert(|row| {
        row.set_string("name", "Arthur")?;
        row.set_i32("age", 30)
    })?;

    players.query(|txn| {
        txn.with_i64("age", |age| age >= 40);
        assert_eq!(txn.count(), 1);
        txn.range(|row| {
            assert_eq!(row.string("name")?.as_deref(), Some("Merlin"));
            Ok(())
        })
    })
}

/// 500-row fixture: race repeats with period 4, class with period 6, age
/// with period 24, so the indexed AND has a closed-form answer.
fn fixture_500() -> Result<Collection> {
    let c = Collection::new();
    c.create_column("race", ColumnSpec::enumeration())?;
    c.create_column("class", ColumnSpec::enumeration())?;
    c.create_column("age", ColumnSpec::f64())?;
    let races = ["human", "elf", "dwarf", "orc"];
    let classes = ["mage", "rogue", "knight", "cleric", "bard", "monk"];
    for i in 0..500usize {
        c.insert(|row| {
            row.set_string("race", races[i % 4])?;
            row.set_string("class", classes[i % 6])?;
            row.set_f64("age", ((i % 24) + 18) as f64)
        })?;
    }
    Ok(c)
}

#[test]
fn indexed_and_matches_typed_scans() -> Result<()> {
    let c = fixture_500()?;
    c.create_index("human", "race", |r| r.string() == "human")?;
    c.create_index("mage", "class", |r| r.string() == "mage")?;
    c.create_index("old", "age", |r| r.float() >= 30.0)?;

    let by_index = c.query(|txn| Ok(txn.with(&["human", "mage", "old"]).count()))?;
    assert_eq!(by_index, 21);

    let by_scan = c.query(|txn| {
        txn.with_string("race", |race| race == "human")
            .with_string("class", |class| class == "mage")
            .with_f64("age", |age| age >= 30.0);
        Ok(txn.count())
    })?;
    assert_eq!(by_scan, by_index);
    Ok(())
}

#[test]
fn atomic_merge_updates_indices() -> Result<()> {
    let c = Collection::new();
    c.create_column("balance", ColumnSpec::f64())?;
    c.create_index("broke", "balance", |r| r.float() < 100.0)?;
    c.create_index("rich", "balance", |r| r.float() > 3000.0)?;

    for _ in 0..10 {
        c.insert(|row| row.set_f64("balance", 50.0))?;
    }
    let broke = c.query(|txn| Ok(txn.with(&["broke"]).count()))?;
    assert_eq!(broke, 10);

    c.query(|txn| {
        txn.range(|row| row.merge_f64("balance", 60.0))
    })?;

    c.query(|txn| {
        assert_eq!(txn.with(&["broke"]).count(), 0);
        assert_eq!(txn.with(&["rich"]).count(), 0);
        Ok(())
    })?;
    c.query(|txn| {
        txn.range(|row| {
            assert_eq!(row.f64("balance")?, Some(110.0));
            Ok(())
        })
    })
}

#[test]
fn primary_key_uniqueness() -> Result<()> {
    let c = Collection::new();
    c.create_column("id", ColumnSpec::key())?;

    for key in [1, 2, 3] {
        c.insert_key(key, |_| Ok(()))?;
    }

    let err = c.insert_key(2, |_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(2)));
    assert_eq!(c.count(), 3);

    let err = c.query_at(0, |row| row.set_key(2)).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(2)));
    c.query_at(0, |row| {
        assert_eq!(row.key("id")?, Some(1));
        Ok(())
    })
}

#[test]
fn snapshot_round_trip_50k_rows() -> Result<()> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    let schema = |c: &Collection| -> Result<()> {
        c.create_column("id", ColumnSpec::key())?;
        c.create_column("score", ColumnSpec::f64())?;
        c.create_column("label", ColumnSpec::string())?;
        Ok(())
    };

    let c = Collection::new();
    schema(&c)?;
    let rows = 50_000i64;
    for key in 0..rows {
        let score: f64 = rng.gen_range(0.0..1e6);
        let label = format!("row-{}", rng.gen_range(0u32..10_000));
        c.insert_key(key, |row| {
            row.set_f64("score", score)?;
            row.set_string("label", &label)
        })?;
    }

    let mut image = Vec::new();
    c.snapshot(&mut image)?;

    let restored = Collection::new();
    schema(&restored)?;
    restored.restore(&mut image.as_slice())?;

    assert_eq!(restored.count(), c.count());
    for key in (0..rows).step_by(997) {
        let (score, label) = c.query_key(key, |row| {
            Ok((row.f64("score")?, row.string("label")?))
        })?;
        restored.query_key(key, |row| {
            assert_eq!(row.f64("score")?, score);
            assert_eq!(row.string("label")?, label);
            Ok(())
        })?;
    }
    Ok(())
}

#[test]
fn fill_containment_invariant() -> Result<()> {
    let c = Collection::new();
    c.create_column("a", ColumnSpec::i64())?;
    c.create_column("b", ColumnSpec::string())?;

    for i in 0..100i64 {
        c.insert(|row| {
            row.set_i64("a", i)?;
            if i % 2 == 0 {
                row.set_string("b", "even")?;
            }
            Ok(())
        })?;
    }
    for idx in [5u32, 10, 15] {
        c.delete_at(idx)?;
    }

    // Every column fill is a subset of the collection fill: a selection
    // narrowed by any column never exceeds the live count.
    let live = c.count();
    let (with_a, with_b) = c.query(|txn| {
        let a = txn.with(&["a"]).count();
        Ok((a, {
            txn.with(&["b"]);
            txn.count()
        }))
    })?;
    assert!(with_a <= live);
    assert!(with_b <= with_a);
    assert_eq!(live, 97);
    assert_eq!(with_a, 97);
    Ok(())
}

#[test]
fn index_soundness_under_random_updates() -> Result<()> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    let c = Collection::new();
    c.create_column("id", ColumnSpec::key())?;
    c.create_column("v", ColumnSpec::i64())?;
    c.create_index("big", "v", |r| r.int() > 500)?;

    for key in 0..200i64 {
        c.insert_key(key, |row| row.set_i64("v", 0))?;
    }
    for _ in 0..2_000 {
        let key = rng.gen_range(0i64..200);
        match rng.gen_range(0u8..3) {
            0 => c.query_key(key, |row| row.set_i64("v", rng.gen_range(0..1000)))?,
            1 => c.query_key(key, |row| row.merge_i64("v", rng.gen_range(-50..50)))?,
            _ => c.query_key(key, |row| row.erase("v"))?,
        }
    }

    // For every live row: index bit set exactly when the predicate holds.
    c.query(|txn| {
        txn.range(|row| {
            let expected = row.i64("v")?.is_some_and(|v| v > 500);
            assert_eq!(row.bool("big")?, expected);
            Ok(())
        })
    })
}
