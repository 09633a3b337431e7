//! Event Manager: pod-lifecycle observer that owns every Pod Subscriber,
//! keyed by `namespace/name`, and dispatches decoded events to the index.

use crate::pod::PodIdentity;
use dashmap::DashMap;
use kvroute_core::index::PrefixIndex;
use kvroute_core::monitor::SubscriberEventSender;
use kvroute_proto::{EventDispatcher, PodSubscriber, SubscriberMetrics};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Dispatches decoded events into the prefix index, resolving each pod's
/// current `(model, adapter)` from a side table the manager keeps in sync
/// with its subscriber registry (§4.3: "resolves the pod's adapter id").
struct IndexDispatcher {
    index: Arc<PrefixIndex>,
    adapters: Arc<DashMap<String, (String, i64)>>,
}

impl EventDispatcher for IndexDispatcher {
    fn dispatch(&self, pod_key: &str, event: kvroute_core::event::KvEvent) {
        use kvroute_core::event::KvEvent;

        let Some(entry) = self.adapters.get(pod_key) else {
            warn!(pod_key, "dispatch for unknown pod, dropping event");
            return;
        };
        let (model, adapter) = entry.value().clone();
        drop(entry);

        let result = match event {
            KvEvent::BlockStored {
                block_hashes,
                parent_block_hash,
                ..
            } => self
                .index
                .process_block_stored(&model, adapter, pod_key, &block_hashes, parent_block_hash),
            KvEvent::BlockRemoved { block_hashes, .. } => {
                self.index.process_block_removed(&model, adapter, pod_key, &block_hashes)
            }
            KvEvent::AllCleared { .. } => self.index.process_all_cleared(&model, adapter, pod_key),
        };
        if let Err(e) = result {
            warn!(pod_key, error = %e, "indexer rejected event");
        }
    }
}

struct SubscriberRuntime {
    identity: PodIdentity,
    stop: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the subscriber registry and routes pod-lifecycle transitions into
/// subscriber start/stop and index cleanup.
pub struct EventManager {
    index: Arc<PrefixIndex>,
    adapters: Arc<DashMap<String, (String, i64)>>,
    dispatcher: Arc<IndexDispatcher>,
    metrics: Arc<SubscriberMetrics>,
    monitor_tx: SubscriberEventSender,
    subscribers: Mutex<HashMap<String, SubscriberRuntime>>,
}

impl EventManager {
    #[must_use]
    pub fn new(index: Arc<PrefixIndex>, metrics: Arc<SubscriberMetrics>, monitor_tx: SubscriberEventSender) -> Self {
        let adapters = Arc::new(DashMap::new());
        let dispatcher = Arc::new(IndexDispatcher {
            index: index.clone(),
            adapters: adapters.clone(),
        });
        Self {
            index,
            adapters,
            dispatcher,
            metrics,
            monitor_tx,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of pods currently subscribed.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Handle a pod-watcher `Apply` (covers both Add and Update, §4.3): if
    /// the pod is now ineligible, tears down any existing subscriber. If
    /// eligible and unchanged from the current registration, no-ops. If
    /// eligible and new or changed, (re)creates the subscriber.
    pub fn on_apply(&self, identity: Option<PodIdentity>) {
        let Some(identity) = identity else {
            return;
        };

        let needs_recreate = {
            let subs = self.subscribers.lock().unwrap();
            match subs.get(&identity.pod_key) {
                Some(existing) => existing.identity != identity,
                None => true,
            }
        };
        if !needs_recreate {
            return;
        }

        self.teardown(&identity.pod_key);
        self.spawn_subscriber(identity);
    }

    /// Handle a pod delete: tear down the subscriber and release the pod's
    /// share of every block it was known to hold.
    pub fn on_delete(&self, pod_key: &str) {
        let Some((model, adapter)) = self.teardown(pod_key) else {
            return;
        };
        if let Err(e) = self.index.process_all_cleared(&model, adapter, pod_key) {
            warn!(pod_key, error = %e, "process_all_cleared failed on pod delete");
        }
    }

    fn spawn_subscriber(&self, identity: PodIdentity) {
        let cfg = kvroute_core::config::PodSubscriberConfig::new(
            identity.pod_key.clone(),
            identity.pod_ip.clone(),
            identity.model_name.clone(),
        );
        self.adapters
            .insert(identity.pod_key.clone(), (identity.model_name.clone(), identity.adapter_id));

        let mut subscriber = PodSubscriber::new(cfg, self.monitor_tx.clone(), self.metrics.clone());
        let stop = subscriber.stop_handle();
        let dispatcher = self.dispatcher.clone();
        let pod_key = identity.pod_key.clone();

        let handle = std::thread::Builder::new()
            .name(format!("kvroute-sub-{pod_key}"))
            .spawn(move || subscriber.run(dispatcher.as_ref()))
            .expect("failed to spawn subscriber thread");

        info!(pod_key = %identity.pod_key, model = %identity.model_name, adapter = identity.adapter_id, "subscriber registered");
        self.subscribers.lock().unwrap().insert(
            identity.pod_key.clone(),
            SubscriberRuntime {
                identity,
                stop,
                handle: Some(handle),
            },
        );
    }

    /// Remove and join the subscriber for `pod_key`, if any. Returns the
    /// `(model, adapter)` it was registered under, for callers that need
    /// to clean up the index afterward.
    fn teardown(&self, pod_key: &str) -> Option<(String, i64)> {
        let runtime = self.subscribers.lock().unwrap().remove(pod_key)?;
        runtime.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = runtime.handle {
            let _ = handle.join();
        }
        self.adapters.remove(pod_key).map(|(_, v)| v)
    }

    /// Idempotent shutdown: stop and join every subscriber, release their
    /// index state. Safe to call more than once (§4.6, §8 invariant 6).
    pub fn shutdown(&self) {
        let keys: Vec<String> = self.subscribers.lock().unwrap().keys().cloned().collect();
        for pod_key in keys {
            self.on_delete(&pod_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvroute_core::monitor::create_monitor;
    use prometheus::Registry;

    fn manager() -> EventManager {
        let index = Arc::new(PrefixIndex::default());
        let registry = Registry::new();
        let metrics = Arc::new(SubscriberMetrics::new(&registry).unwrap());
        let (tx, _rx) = create_monitor();
        EventManager::new(index, metrics, tx)
    }

    fn identity(pod_key: &str, ip: &str) -> PodIdentity {
        PodIdentity {
            pod_key: pod_key.to_string(),
            pod_ip: ip.to_string(),
            model_name: "M".to_string(),
            adapter_id: -1,
        }
    }

    #[test]
    fn apply_registers_a_new_eligible_pod() {
        let mgr = manager();
        mgr.on_apply(Some(identity("ns/p0", "10.0.0.1")));
        assert_eq!(mgr.subscriber_count(), 1);
        mgr.shutdown();
    }

    #[test]
    fn apply_is_a_noop_when_identity_is_unchanged() {
        let mgr = manager();
        mgr.on_apply(Some(identity("ns/p0", "10.0.0.1")));
        mgr.on_apply(Some(identity("ns/p0", "10.0.0.1")));
        assert_eq!(mgr.subscriber_count(), 1);
        mgr.shutdown();
    }

    #[test]
    fn apply_recreates_on_ip_change() {
        let mgr = manager();
        mgr.on_apply(Some(identity("ns/p0", "10.0.0.1")));
        mgr.on_apply(Some(identity("ns/p0", "10.0.0.2")));
        assert_eq!(mgr.subscriber_count(), 1);
        mgr.shutdown();
    }

    #[test]
    fn apply_with_none_does_nothing() {
        let mgr = manager();
        mgr.on_apply(None);
        assert_eq!(mgr.subscriber_count(), 0);
    }

    #[test]
    fn delete_releases_the_pods_blocks() {
        let mgr = manager();
        let idx = Arc::new(PrefixIndex::default());
        let registry = Registry::new();
        let metrics = Arc::new(SubscriberMetrics::new(&registry).unwrap());
        let (tx, _rx) = create_monitor();
        let mgr = EventManager::new(idx.clone(), metrics, tx);

        let tokens: Vec<i32> = (0..16).collect();
        let hashes = PrefixIndex::get_prefix_hashes(&tokens, 16);
        idx.add_prefix("M", -1, "ns/p0", &hashes).unwrap();
        mgr.on_apply(Some(identity("ns/p0", "10.0.0.1")));
        mgr.on_delete("ns/p0");

        assert_eq!(mgr.subscriber_count(), 0);
        let matches = idx.match_prefix(
            "M",
            -1,
            &tokens,
            &std::iter::once(std::sync::Arc::from("ns/p0")).collect(),
            16,
        );
        assert!(matches.matches.is_empty());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mgr = manager();
        mgr.on_apply(Some(identity("ns/p0", "10.0.0.1")));
        mgr.shutdown();
        mgr.shutdown();
        assert_eq!(mgr.subscriber_count(), 0);
    }
}
