//! Store Lifecycle (§4.6): the process-wide singleton that owns the
//! Prefix Index, Event Manager, and Prometheus registry, with idempotent
//! initialize/cleanup/close.

use crate::event_manager::EventManager;
use kvroute_core::config::StoreConfig;
use kvroute_core::error::Result;
use kvroute_core::index::PrefixIndex;
use kvroute_core::monitor::{create_monitor, SubscriberMonitor};
use kvroute_proto::SubscriberMetrics;
use prometheus::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

/// The eviction sweep's own timer thread (§5: "the eviction sweep runs
/// on its own timer"), independent of any subscriber's event loop.
struct EvictionTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EvictionTimer {
    fn spawn(index: Arc<PrefixIndex>, interval: Duration, max_contexts: usize, max_prefixes_per_context: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_loop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("kvroute-eviction".to_string())
            .spawn(move || {
                while !stop_loop.load(Ordering::Relaxed) {
                    sleep_in_slices(interval, &stop_loop);
                    if stop_loop.load(Ordering::Relaxed) {
                        break;
                    }
                    index.sweep(max_contexts, max_prefixes_per_context);
                }
            })
            .expect("failed to spawn eviction timer thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Sleep for `total`, checking `stop` every 200ms so shutdown doesn't
/// wait out a long eviction interval.
fn sleep_in_slices(total: Duration, stop: &AtomicBool) {
    let slice = Duration::from_millis(200);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let this_sleep = slice.min(remaining);
        std::thread::sleep(this_sleep);
        remaining = remaining.saturating_sub(this_sleep);
    }
}

/// Owns every process-wide handle the KV-sync feature needs.
pub struct Store {
    config: StoreConfig,
    registry: Registry,
    index: Arc<PrefixIndex>,
    event_manager: Option<Arc<EventManager>>,
    monitor: Option<SubscriberMonitor>,
    eviction: Option<EvictionTimer>,
}

impl Store {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            index: Arc::new(PrefixIndex::default()),
            event_manager: None,
            monitor: None,
            eviction: None,
        }
    }

    /// Validate configuration and wire the Indexer and Event Manager. On
    /// any failure, releases every partially-initialized resource before
    /// returning the error (§4.3 initialization contract).
    pub fn initialize(&mut self) -> Result<()> {
        match self.try_initialize() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.cleanup();
                Err(e)
            }
        }
    }

    fn try_initialize(&mut self) -> Result<()> {
        self.config.validate()?;

        let metrics = Arc::new(SubscriberMetrics::new(&self.registry)?);
        let (tx, rx) = create_monitor();
        let event_manager = Arc::new(EventManager::new(self.index.clone(), metrics, tx));

        self.event_manager = Some(event_manager);
        self.monitor = Some(rx);
        self.eviction = Some(EvictionTimer::spawn(
            self.index.clone(),
            self.config.eviction_interval,
            self.config.max_contexts,
            self.config.max_prefixes_per_context,
        ));
        info!("kv-sync store initialized");
        Ok(())
    }

    /// Release every owned handle. Idempotent: safe to call repeatedly
    /// (§8 invariant 6) — a second call finds nothing left to release.
    pub fn cleanup(&mut self) {
        if let Some(mut eviction) = self.eviction.take() {
            eviction.stop();
        }
        if let Some(manager) = self.event_manager.take() {
            manager.shutdown();
        }
        self.monitor = None;
    }

    /// Alias for [`Store::cleanup`], matching the §4.6 naming.
    pub fn close(&mut self) {
        self.cleanup();
    }

    #[must_use]
    pub fn index(&self) -> &Arc<PrefixIndex> {
        &self.index
    }

    #[must_use]
    pub fn event_manager(&self) -> Option<&Arc<EventManager>> {
        self.event_manager.as_ref()
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_fails_initialize_and_leaves_nothing_owned() {
        let mut store = Store::new(StoreConfig::default());
        assert!(store.initialize().is_err());
        assert!(store.event_manager().is_none());
    }

    #[test]
    fn enabled_config_initializes_successfully() {
        let mut store = Store::new(StoreConfig::enabled("http://tokenizer:8000"));
        assert!(store.initialize().is_ok());
        assert!(store.event_manager().is_some());
        store.close();
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut store = Store::new(StoreConfig::enabled("http://tokenizer:8000"));
        store.initialize().unwrap();
        store.cleanup();
        store.cleanup();
        assert!(store.event_manager().is_none());
    }

    #[test]
    fn close_after_failed_initialize_is_a_noop() {
        let mut store = Store::new(StoreConfig::default());
        assert!(store.initialize().is_err());
        store.close();
        store.close();
    }

    #[test]
    fn eviction_timer_sweeps_contexts_down_to_the_configured_bound() {
        let cfg = StoreConfig::enabled("http://tokenizer:8000")
            .with_eviction_interval(std::time::Duration::from_millis(50))
            .with_eviction_bounds(2, 1000);
        let mut store = Store::new(cfg);
        store.initialize().unwrap();

        for m in 0..5 {
            store.index().add_prefix(&format!("m{m}"), -1, "p", &[1]).unwrap();
        }
        assert_eq!(store.index().context_count(), 5);

        std::thread::sleep(std::time::Duration::from_millis(300));
        assert_eq!(store.index().context_count(), 2);

        store.close();
    }
}
