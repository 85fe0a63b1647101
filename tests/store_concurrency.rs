//! Concurrent writers against one storage root.
//!
//! Each thread builds its own registry or store over the same file, the
//! way separate wp-spin invocations do. The file lock must serialize their
//! read-modify-write cycles.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;

use wpspin::core::store::JsonStore;
use wpspin::core::types::AllocationKey;
use wpspin::ports::mock::MockProber;
use wpspin::ports::PortRegistry;

const WRITERS: usize = 8;

#[test]
fn concurrent_allocations_get_distinct_ports() {
    let home = TempDir::new().unwrap();
    let projects: Vec<TempDir> = (0..WRITERS).map(|_| TempDir::new().unwrap()).collect();
    let path = home.path().join("ports.json");
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = projects
        .iter()
        .enumerate()
        .map(|(i, project)| {
            let path = path.clone();
            let project = project.path().to_path_buf();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let registry = PortRegistry::at(path, Box::new(MockProber::new()));
                barrier.wait();
                registry
                    .allocate(&AllocationKey::raw(format!("site-{}", i)), 9000, &project)
                    .unwrap()
            })
        })
        .collect();

    let ports: HashSet<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ports.len(), WRITERS);
    assert!(ports.iter().all(|p| (9000..9000 + WRITERS as u16).contains(p)));

    let registry = PortRegistry::at(path, Box::new(MockProber::new()));
    assert_eq!(registry.list().unwrap().len(), WRITERS);
}

#[test]
fn concurrent_updates_are_not_lost() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("counter.json");
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store: JsonStore<BTreeMap<String, u64>> = JsonStore::new(path);
                barrier.wait();
                for _ in 0..5 {
                    store
                        .update(|doc| {
                            *doc.entry("count".to_string()).or_default() += 1;
                            Ok(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store: JsonStore<BTreeMap<String, u64>> = JsonStore::new(path);
    assert_eq!(store.load().unwrap()["count"], (WRITERS * 5) as u64);
}
