//! Cross-module integration across the public API: `Store` lifecycle,
//! `EventManager` pod-lifecycle registration, the prefix index, and the
//! routing policy, approximating end-to-end scenarios E1, E3, and E6.

use kvroute::{route, EventManager, PodIdentity, RoutingDecision, RunningRequestCounts, Store, Tokenizer};
use kvroute_core::config::StoreConfig;
use kvroute_core::error::Result as SyncResult;
use kvroute_core::index::PodKey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct FixedTokenizer(Vec<i32>);
impl Tokenizer for FixedTokenizer {
    fn tokenize(&self, _text: &str) -> SyncResult<Vec<i32>> {
        Ok(self.0.clone())
    }
}

struct ZeroCounts;
impl RunningRequestCounts for ZeroCounts {
    fn get(&self, _pod_key: &PodKey) -> u64 {
        0
    }
}

fn pods(names: &[&str]) -> HashSet<PodKey> {
    names.iter().map(|n| Arc::from(*n)).collect()
}

/// A full store lifecycle: initialize, register two pods for the same
/// model, let the index observe a shared prefix, route a request to one
/// of them, delete one pod, and confirm its share is released while its
/// sibling's is untouched.
#[test]
fn store_event_manager_and_router_end_to_end() {
    let mut store = Store::new(StoreConfig::enabled("http://127.0.0.1:9"));
    store.initialize().unwrap();

    let manager: Arc<EventManager> = store.event_manager().unwrap().clone();
    manager.on_apply(Some(PodIdentity {
        pod_key: "ns/p1".to_string(),
        pod_ip: "127.0.0.1".to_string(),
        model_name: "llama".to_string(),
        adapter_id: -1,
    }));
    manager.on_apply(Some(PodIdentity {
        pod_key: "ns/p2".to_string(),
        pod_ip: "127.0.0.1".to_string(),
        model_name: "llama".to_string(),
        adapter_id: -1,
    }));
    assert_eq!(manager.subscriber_count(), 2);

    // Simulate both pods having already reported the same prefix chain
    // (what the Event Manager's dispatcher would have done had real
    // BlockStored events arrived over the wire).
    let tokens: Vec<i32> = (0..16).collect();
    let hashes = kvroute_core::index::PrefixIndex::get_prefix_hashes(&tokens, 16);
    store.index().add_prefix("llama", -1, "ns/p1", &hashes).unwrap();
    store.index().add_prefix("llama", -1, "ns/p2", &hashes).unwrap();

    let cfg = StoreConfig::enabled("http://127.0.0.1:9");
    let tokenizer = FixedTokenizer(tokens.clone());
    let ready = pods(&["ns/p1", "ns/p2"]);
    let decision: RoutingDecision =
        route(store.index(), &tokenizer, &ZeroCounts, &cfg, "llama", -1, "hello world", &ready).unwrap();
    assert!(decision.pod_key.as_ref() == "ns/p1" || decision.pod_key.as_ref() == "ns/p2");

    manager.on_delete("ns/p1");
    assert_eq!(manager.subscriber_count(), 1);

    let remaining = pods(&["ns/p1", "ns/p2"]);
    let result = store.index().match_prefix("llama", -1, &tokens, &remaining, 16);
    assert!(!result.matches.contains_key(&(Arc::from("ns/p1") as PodKey)));
    assert_eq!(result.matches.get(&(Arc::from("ns/p2") as PodKey)), Some(&100));

    store.close();
    assert!(store.event_manager().is_none());
}

/// Registering the same pod identity twice is a no-op; an IP change
/// tears down and recreates the subscriber without losing the pod count.
#[test]
fn reapplying_unchanged_identity_is_idempotent() {
    let mut store = Store::new(StoreConfig::enabled("http://127.0.0.1:9"));
    store.initialize().unwrap();
    let manager = store.event_manager().unwrap().clone();

    let identity = PodIdentity {
        pod_key: "ns/p0".to_string(),
        pod_ip: "127.0.0.1".to_string(),
        model_name: "llama".to_string(),
        adapter_id: -1,
    };
    manager.on_apply(Some(identity.clone()));
    manager.on_apply(Some(identity));
    assert_eq!(manager.subscriber_count(), 1);

    manager.on_apply(Some(PodIdentity {
        pod_key: "ns/p0".to_string(),
        pod_ip: "127.0.0.2".to_string(),
        model_name: "llama".to_string(),
        adapter_id: -1,
    }));
    assert_eq!(manager.subscriber_count(), 1);

    store.close();
}

/// No ready pods means no routing decision, regardless of index state.
#[test]
fn routing_with_no_ready_pods_returns_none() {
    let index = kvroute_core::index::PrefixIndex::default();
    let cfg = StoreConfig::enabled("http://127.0.0.1:9");
    let tokenizer = FixedTokenizer(vec![1, 2, 3]);
    let ready = HashSet::new();
    assert!(route(&index, &tokenizer, &ZeroCounts, &cfg, "llama", -1, "hi", &ready).is_none());
}
