//! # kvroute
//!
//! Prefix-cache-aware KV event sync and routing index for a fleet of LLM
//! engine pods.
//!
//! ## Architecture
//!
//! `kvroute` is structured as a small messaging kernel wired into a
//! Kubernetes-aware service, the way this lineage structures its larger
//! systems:
//!
//! - **`kvroute-core`**: the sharded prefix index, reconnect backoff,
//!   configuration, and error types — no networking.
//! - **`kvroute-proto`**: the pod subscriber — ZMQ sockets, wire codec,
//!   per-subscriber metrics.
//! - **`kvroute`** (this crate): the Event Manager, the Kubernetes pod
//!   watcher, the routing policy, and the `Store` lifecycle singleton
//!   that wires all of the above together, plus the `kvrouted` binary.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kvroute::store::Store;
//! use kvroute_core::config::StoreConfig;
//!
//! # fn example() -> kvroute_core::error::Result<()> {
//! let mut store = Store::new(StoreConfig::enabled("http://tokenizer:8000"));
//! store.initialize()?;
//! // ... start a kvroute::watcher::PodWatcher against store.event_manager() ...
//! store.close();
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod event_manager;
pub mod pod;
pub mod router;
pub mod store;
pub mod tokenizer;
pub mod watcher;

/// Development helpers (binaries, examples).
pub mod dev_tracing;

pub use event_manager::EventManager;
pub use pod::PodIdentity;
pub use router::{route, RoutingDecision, RunningRequestCounts};
pub use store::Store;
pub use tokenizer::{CharacterTokenizer, RemoteTokenizer, Tokenizer};
pub use watcher::PodWatcher;
