//! kvroute-core
//!
//! Runtime-agnostic kernel for the prefix-cache-aware KV event-sync engine:
//! - Error types shared by every crate in the workspace (`error`)
//! - Capped exponential backoff for subscriber reconnects (`reconnect`)
//! - Subscriber lifecycle events (`monitor`)
//! - Builder-style configuration (`config`)
//! - The stable block-chain hash function (`hashing`)
//! - The two-level sharded prefix index (`index`)
//!
//! No networking, no Kubernetes, no Prometheus wiring lives here; those are
//! composed on top in `kvroute-proto` and `kvroute`.

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]

pub mod config;
pub mod error;
pub mod event;
pub mod hashing;
pub mod index;
pub mod monitor;
pub mod reconnect;

/// A small prelude for downstream crates.
pub mod prelude {
    pub use crate::config::{PodSubscriberConfig, StoreConfig, TokenizerType};
    pub use crate::error::{Result, SyncError};
    pub use crate::event::{EventBatch, KvEvent};
    pub use crate::hashing::{chunk_and_hash_chain, hash_block};
    pub use crate::index::{ModelContext, ModelKey, PodKey, PrefixBlock, PrefixIndex, PrefixMatch};
    pub use crate::monitor::{create_monitor, SubscriberEvent, SubscriberMonitor};
    pub use crate::reconnect::{ReconnectError, ReconnectState};
}
