//! Many threads reading and writing one cache.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use actcache_conformance::{simple_entry, TestCache};
use actcache_store::CachedEntry;

const THREADS: usize = 8;
const PER_THREAD: usize = 100;

fn key(thread: usize, i: usize) -> String {
    format!("//t{thread}:{i}")
}

#[test]
fn concurrent_puts_and_gets_while_the_clock_moves() {
    let fixture = Arc::new(TestCache::new());
    let cache = Arc::new(fixture.open());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let fixture = Arc::clone(&fixture);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = key(t, i);
                    cache.put(&key, &simple_entry(&key));
                    assert_eq!(cache.get(&key), Some(CachedEntry::Entry(simple_entry(&key))));
                    if i % 10 == 0 {
                        fixture.advance(Duration::from_millis(500));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.entry_count(), THREADS * PER_THREAD);
    assert_eq!(cache.interner().size(), 2 * THREADS * PER_THREAD);
    cache.save().unwrap();
    drop(cache);

    let cache = fixture.open();
    assert!(fixture.sink.is_empty());
    assert_eq!(cache.entry_count(), THREADS * PER_THREAD);
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            assert!(cache.get(&key(t, i)).is_some());
        }
    }
}

#[test]
fn eager_journal_from_many_threads_reloads_without_save() {
    let fixture = TestCache::eager();
    let cache = Arc::new(fixture.open());

    thread::scope(|scope| {
        for t in 0..4 {
            let cache = Arc::clone(&cache);
            scope.spawn(move || {
                for i in 0..50 {
                    let key = key(t, i);
                    cache.put(&key, &simple_entry(&key));
                }
            });
        }
    });
    drop(cache);

    let cache = fixture.open();
    assert!(fixture.sink.is_empty());
    assert_eq!(cache.entry_count(), 200);
}

#[test]
fn concurrent_removals_and_puts_on_distinct_keys() {
    let fixture = TestCache::new();
    let cache = fixture.open();
    for i in 0..200 {
        let key = key(0, i);
        cache.put(&key, &simple_entry(&key));
    }

    thread::scope(|scope| {
        scope.spawn(|| {
            for i in (0..200).step_by(2) {
                cache.remove(&key(0, i));
            }
        });
        scope.spawn(|| {
            for i in 0..100 {
                let key = key(1, i);
                cache.put(&key, &simple_entry(&key));
            }
        });
        scope.spawn(|| {
            cache.remove_if(|entry| {
                entry
                    .as_entry()
                    .is_some_and(|e| e.action_key.ends_with(":199"))
            });
        });
    });

    assert_eq!(cache.entry_count(), 99 + 100);
    assert!(cache.get(&key(0, 199)).is_none());
    assert!(cache.get(&key(0, 1)).is_some());
}
