//! # kvroute-proto
//!
//! **Internal pod subscriber implementation crate.**
//!
//! This crate owns everything that speaks to one engine pod directly: the
//! MessagePack wire codec (`codec`), the ZMQ SUB/REQ subscriber state
//! machine (`subscriber`), and the subscriber's own Prometheus metric
//! family (`metrics`). Application code should depend on the `kvroute`
//! crate, which composes this with the Kubernetes pod watcher, the prefix
//! index, and the routing integration.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod codec;
pub mod metrics;
pub mod subscriber;

pub use metrics::SubscriberMetrics;
pub use subscriber::{EventDispatcher, PodSubscriber, SubscriberState};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use super::codec;
    pub use super::{EventDispatcher, PodSubscriber, SubscriberMetrics, SubscriberState};
}
