//! Decoded KV-cache lifecycle events.
//!
//! These are the typed variants the wire codec produces and the event
//! manager dispatches to the [`crate::index::PrefixIndex`]. Polymorphism
//! over event kinds is expressed as one enum with a single dispatch point,
//! not a class hierarchy (§9).

/// A single decoded KV-cache lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvEvent {
    /// One or more new blocks were stored, in chain order.
    BlockStored {
        /// Engine timestamp (opaque, milliseconds since epoch).
        timestamp: i64,
        /// Hashes of the newly stored blocks, in chain order.
        block_hashes: Vec<u64>,
        /// Token ids for each block, parallel to `block_hashes`.
        token_ids: Vec<Vec<i32>>,
        /// Hash of the block preceding `block_hashes[0]`, if any.
        parent_block_hash: Option<u64>,
        /// Model name this event applies to.
        model_name: String,
    },
    /// One or more blocks were evicted from the pod's cache.
    BlockRemoved {
        /// Engine timestamp (opaque, milliseconds since epoch).
        timestamp: i64,
        /// Hashes of the removed blocks.
        block_hashes: Vec<u64>,
        /// Model name this event applies to.
        model_name: String,
    },
    /// The pod cleared its entire cache for a model.
    AllCleared {
        /// Engine timestamp (opaque, milliseconds since epoch).
        timestamp: i64,
        /// Model name this event applies to.
        model_name: String,
    },
}

impl KvEvent {
    /// The model name this event applies to, regardless of variant.
    #[must_use]
    pub fn model_name(&self) -> &str {
        match self {
            Self::BlockStored { model_name, .. }
            | Self::BlockRemoved { model_name, .. }
            | Self::AllCleared { model_name, .. } => model_name,
        }
    }
}

/// A decoded batch: an ordered list of events sharing a transport frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    /// Events in the order they appeared on the wire.
    pub events: Vec<KvEvent>,
}
