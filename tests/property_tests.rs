//! Property-based tests for the port registry.
//!
//! These tests use proptest to verify allocation invariants hold across
//! randomly generated key sets, preferred ports and busy ports.

use std::collections::HashSet;

use proptest::prelude::*;
use tempfile::TempDir;

use wpspin::core::types::{AllocationKey, Hostname};
use wpspin::ports::mock::MockProber;
use wpspin::ports::PortRegistry;

/// Strategy for short allocation key names.
fn key_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,11}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Distinct live keys never share a port, whatever the preferred ports
    /// and whichever ports the host reports as bound.
    #[test]
    fn live_keys_never_collide(
        requests in prop::collection::vec((key_name(), 8000u16..8020), 1..12),
        busy in prop::collection::hash_set(8000u16..8040, 0..10),
    ) {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let registry = PortRegistry::at(
            home.path().join("ports.json"),
            Box::new(MockProber::new().with_busy(busy.iter().copied())),
        )
        .with_window(100);

        let mut seen = HashSet::new();
        for (name, preferred) in &requests {
            let port = registry
                .allocate(&AllocationKey::raw(name.as_str()), *preferred, project.path())
                .unwrap();
            prop_assert!(!busy.contains(&port));
            if seen.insert(name.clone()) {
                prop_assert!(port >= *preferred);
            }
        }

        let allocations = registry.list().unwrap();
        let ports: HashSet<u16> = allocations.iter().map(|a| a.port).collect();
        prop_assert_eq!(ports.len(), allocations.len());
    }

    /// Allocating the same key again returns the same port and leaves the
    /// registry unchanged.
    #[test]
    fn allocation_is_idempotent(name in key_name(), preferred in 1024u16..60000) {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let prober = MockProber::new();
        let registry = PortRegistry::at(home.path().join("ports.json"), Box::new(prober.clone()));
        let key = AllocationKey::raw(name.as_str());

        let first = registry.allocate(&key, preferred, project.path()).unwrap();
        let before = registry.list().unwrap();
        prober.set_busy(first);
        let second = registry.allocate(&key, preferred, project.path()).unwrap();

        prop_assert_eq!(first, second);
        prop_assert_eq!(before, registry.list().unwrap());
    }

    /// Hostnames are stored lowercased and accepted again unchanged.
    #[test]
    fn hostnames_normalize_to_lowercase(
        labels in prop::collection::vec("[A-Za-z][A-Za-z0-9]{0,9}", 2..4),
    ) {
        let raw = labels.join(".");
        let host = Hostname::new(raw.as_str()).unwrap();
        prop_assert_eq!(host.as_str(), raw.to_ascii_lowercase());
        prop_assert_eq!(Hostname::new(host.as_str()).unwrap(), host);
    }
}
