use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use epochmap::{Config, ConfigBuilder, Hv, Table};

#[test]
fn s1_single_thread_basic() {
    let table: Table<&'static str> = Table::new();
    let h7 = Hv::new(7);

    assert_eq!(table.put(h7, Arc::new("a")), None);
    assert_eq!(table.get(h7).as_deref(), Some(&"a"));

    assert_eq!(table.put(h7, Arc::new("b")).as_deref(), Some(&"a"));
    assert_eq!(table.get(h7).as_deref(), Some(&"b"));

    assert_eq!(table.remove(h7).as_deref(), Some(&"b"));
    assert_eq!(table.get(h7), None);
}

#[test]
fn s2_collision() {
    let config = ConfigBuilder::new().min_store_size(4).build();
    let table: Table<i32> = Table::with_config(config);
    let h1 = Hv::new(1);
    let h5 = Hv::new(5);

    assert!(table.add(h1, Arc::new(1)));
    assert!(table.add(h5, Arc::new(5)));

    assert_eq!(table.remove(h1).map(|v| *v), Some(1));
    assert_eq!(table.get(h5).map(|v| *v), Some(5));
}

#[test]
fn s3_growth_preserves_all_items() {
    let config = ConfigBuilder::new().min_store_size(4).build();
    let table: Table<i32> = Table::with_config(config);

    for h in 1..=4i32 {
        assert!(table.add(Hv::new(h as u128), Arc::new(h)));
    }

    assert_eq!(table.len(), 4);
    for h in 1..=4i32 {
        assert_eq!(table.get(Hv::new(h as u128)).map(|v| *v), Some(h));
    }
}

#[test]
fn s4_shrink_after_heavy_removal() {
    let config = ConfigBuilder::new().min_store_size(256).build();
    let table: Table<i32> = Table::with_config(config);

    for h in 0..192i32 {
        assert!(table.add(Hv::new(h as u128 + 1), Arc::new(h)));
    }
    for h in 0..180i32 {
        assert!(table.remove(Hv::new(h as u128 + 1)).is_some());
    }

    // one more insertion to push past threshold and force a migration
    assert!(table.add(Hv::new(9999), Arc::new(-1)));

    assert_eq!(table.len(), 13);
    for h in 180..192i32 {
        assert_eq!(table.get(Hv::new(h as u128 + 1)).map(|v| *v), Some(h));
    }
    assert_eq!(table.get(Hv::new(9999)).map(|v| *v), Some(-1));
}

#[test]
fn s5_concurrent_put_get() {
    let table: Arc<Table<i32>> = Arc::new(Table::new());
    let hv = Hv::new(42);
    let seen_nonnull = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));

    table.put(hv, Arc::new(0));

    let writer = {
        let table = Arc::clone(&table);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            for v in 1..2000 {
                table.put(hv, Arc::new(v));
            }
            stop.store(true, Ordering::SeqCst);
        })
    };

    let reader = {
        let table = Arc::clone(&table);
        let stop = Arc::clone(&stop);
        let seen_nonnull = Arc::clone(&seen_nonnull);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if table.get(hv).is_some() {
                    seen_nonnull.store(true, Ordering::SeqCst);
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    assert!(seen_nonnull.load(Ordering::SeqCst));
    assert_eq!(table.get(hv).map(|v| *v), Some(1999));
}

#[test]
fn s6_view_epoch_excludes_later_inserts() {
    let table: Table<i32> = Table::new();

    for k in 1..=50i32 {
        table.put(Hv::new(k as u128), Arc::new(k));
    }
    let cutoff = table.current_epoch();
    for k in 51..=100i32 {
        table.put(Hv::new(k as u128), Arc::new(k));
    }

    let snapshot = table.view_epoch(cutoff);
    assert_eq!(snapshot.len(), 50);
    let mut values: Vec<i32> = snapshot.iter().map(|(v, _)| **v).collect();
    values.sort_unstable();
    assert_eq!(values, (1..=50).collect::<Vec<_>>());
}

#[test]
fn replace_never_inserts_a_new_key() {
    let table: Table<i32> = Table::new();
    assert_eq!(table.replace(Hv::new(1), Arc::new(1)), None);
    assert_eq!(table.get(Hv::new(1)), None);

    table.add(Hv::new(1), Arc::new(10));
    assert_eq!(table.replace(Hv::new(1), Arc::new(20)).map(|v| *v), Some(10));
    assert_eq!(table.get(Hv::new(1)).map(|v| *v), Some(20));
}

#[test]
fn add_is_rejected_once_present() {
    let table: Table<i32> = Table::new();
    assert!(table.add(Hv::new(9), Arc::new(1)));
    assert!(!table.add(Hv::new(9), Arc::new(2)));
    assert_eq!(table.get(Hv::new(9)).map(|v| *v), Some(1));
}

#[test]
fn dropping_table_frees_remaining_items() {
    let dropped = Arc::new(AtomicBool::new(false));

    struct MarkOnDrop(Arc<AtomicBool>);
    impl Drop for MarkOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    {
        let table: Table<MarkOnDrop> = Table::new();
        table.put(Hv::new(1), Arc::new(MarkOnDrop(Arc::clone(&dropped))));
    }

    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn custom_config_is_honored() {
    let config = Config::default();
    assert_eq!(config.growth_ratio(), (3, 4));
    let table: Table<i32> = Table::with_capacity_hint(ConfigBuilder::new().min_store_size(8).build(), 3);
    assert!(table.is_empty());
}

#[test]
fn randomized_concurrent_mixed_workload() {
    use rand::Rng;

    let config = ConfigBuilder::new().min_store_size(8).build();
    let table: Arc<Table<u64>> = Arc::new(Table::with_config(config));
    let keyspace = 64u128;

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for i in 0..500u64 {
                    let hv = Hv::new(rng.gen_range(0..keyspace));
                    match rng.gen_range(0..4) {
                        0 => {
                            table.put(hv, Arc::new(worker * 10_000 + i));
                        }
                        1 => {
                            table.add(hv, Arc::new(worker * 10_000 + i));
                        }
                        2 => {
                            table.remove(hv);
                        }
                        _ => {
                            table.get(hv);
                        }
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // every key still reachable via `get` must also appear in a full view,
    // and the view must contain no duplicate hash slots.
    let snapshot = table.view(false);
    let mut seen = std::collections::HashSet::new();
    for (_, epoch) in &snapshot {
        assert!(seen.insert(*epoch), "duplicate sort_epoch in view");
    }
    assert_eq!(snapshot.len() as u64, table.len());
}
