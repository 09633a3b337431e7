//! Kubernetes pod-lifecycle watcher (§10.5): translates the core `Pod`
//! resource's `Apply`/`Delete` stream into the Event Manager's lifecycle
//! hooks. This is the one place in the crate that runs on an async
//! executor — everything downstream of it stays blocking (§5, §10.6).

use crate::event_manager::EventManager;
use crate::pod::PodIdentity;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::{Api, Client};
use kvroute_core::error::{Result, SyncError};
use std::sync::Arc;
use tracing::warn;

/// Drives pod-lifecycle events into an [`EventManager`].
pub struct PodWatcher {
    manager: Arc<EventManager>,
}

impl PodWatcher {
    #[must_use]
    pub fn new(manager: Arc<EventManager>) -> Self {
        Self { manager }
    }

    /// Build a dedicated tokio runtime and run the watcher loop on it
    /// until the stream ends or errors out. Blocks the calling thread.
    pub fn run_blocking(&self, namespace: Option<&str>) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| SyncError::config(format!("failed to build watcher runtime: {e}")))?;
        runtime.block_on(self.watch(namespace))
    }

    async fn watch(&self, namespace: Option<&str>) -> Result<()> {
        let client = Client::try_default()
            .await
            .map_err(|e| SyncError::connect_transient(format!("kube client: {e}")))?;
        let api: Api<Pod> = namespace.map_or_else(|| Api::all(client.clone()), |ns| Api::namespaced(client.clone(), ns));

        let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(pod) | watcher::Event::InitApply(pod)) => self.handle_applied(&pod),
                Ok(watcher::Event::Delete(pod)) => self.handle_deleted(&pod),
                Ok(watcher::Event::Init | watcher::Event::InitDone) => {}
                Err(e) => warn!(error = %e, "pod watcher stream error"),
            }
        }
        Ok(())
    }

    fn handle_applied(&self, pod: &Pod) {
        self.manager.on_apply(identity_from_pod(pod));
    }

    fn handle_deleted(&self, pod: &Pod) {
        if let Some(pod_key) = pod_key(pod) {
            self.manager.on_delete(&pod_key);
        }
    }
}

fn pod_key(pod: &Pod) -> Option<String> {
    let namespace = pod.metadata.namespace.as_deref()?;
    let name = pod.metadata.name.as_deref()?;
    Some(format!("{namespace}/{name}"))
}

fn identity_from_pod(pod: &Pod) -> Option<PodIdentity> {
    let key = pod_key(pod)?;
    let running = pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running");
    let ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone()).unwrap_or_default();
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    PodIdentity::from_labels(key, ip, running, &labels)
}
