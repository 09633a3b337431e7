//! `kvrouted`: wires the Store, Event Manager, and Kubernetes pod watcher
//! together using environment-driven configuration, then blocks forever
//! serving pod lifecycle events.

use kvroute::dev_tracing;
use kvroute::{PodWatcher, Store};
use kvroute_core::config::StoreConfig;
use std::env;
use std::process::ExitCode;

fn config_from_env() -> StoreConfig {
    let endpoint = env::var("KVROUTE_TOKENIZER_ENDPOINT").unwrap_or_default();
    if endpoint.is_empty() {
        return StoreConfig::default();
    }
    StoreConfig::enabled(endpoint)
}

fn watch_namespace() -> Option<String> {
    env::var("KVROUTE_NAMESPACE").ok().filter(|s| !s.is_empty())
}

fn main() -> ExitCode {
    dev_tracing::init_tracing();

    let mut store = Store::new(config_from_env());
    if let Err(e) = store.initialize() {
        tracing::error!(error = %e, "failed to initialize kv-sync store");
        return ExitCode::FAILURE;
    }

    let manager = store
        .event_manager()
        .expect("event manager is present after successful initialize")
        .clone();
    let watcher = PodWatcher::new(manager);

    let namespace = watch_namespace();
    if let Err(e) = watcher.run_blocking(namespace.as_deref()) {
        tracing::error!(error = %e, "pod watcher exited with an error");
        store.close();
        return ExitCode::FAILURE;
    }

    store.close();
    ExitCode::SUCCESS
}
