//! Builder-style configuration for pod subscribers and the process-wide store.
//!
//! Mirrors the socket-options builder pattern used elsewhere in this
//! lineage: a `Default` impl carrying every documented default, plus
//! `.with_*()` methods so callers only set what they need to override.

use std::time::Duration;

/// Per-pod subscriber configuration.
///
/// # Examples
///
/// ```rust
/// use kvroute_core::config::PodSubscriberConfig;
/// use std::time::Duration;
///
/// let cfg = PodSubscriberConfig::new("ns/pod-0", "10.0.0.5", "llama-3-8b")
///     .with_reconnect_delay(Duration::from_millis(250))
///     .with_max_reconnect_interval(Duration::from_secs(15));
///
/// assert_eq!(cfg.pub_port, 5557);
/// assert_eq!(cfg.reconnect_delay, Duration::from_millis(250));
/// ```
#[derive(Debug, Clone)]
pub struct PodSubscriberConfig {
    /// `namespace/name` identity of the pod.
    pub pod_key: String,
    /// Pod IP address to connect to.
    pub pod_ip: String,
    /// Model name served by this pod.
    pub model_name: String,
    /// Event (SUB) port. Default 5557.
    pub pub_port: u16,
    /// Replay (REQ/REP) port. Default 5558.
    pub router_port: u16,
    /// Socket poll interval.
    pub poll_timeout: Duration,
    /// Replay request/reply timeout.
    pub replay_timeout: Duration,
    /// Initial reconnect delay.
    pub reconnect_delay: Duration,
    /// Maximum reconnect interval (backoff cap).
    pub max_reconnect_interval: Duration,
    /// Multiplicative backoff factor applied per failed attempt.
    pub reconnect_backoff_factor: f64,
    /// Optional topic filter; empty string subscribes to everything.
    pub topic: String,
}

impl PodSubscriberConfig {
    /// Create configuration for a pod with default ports, timeouts, and backoff.
    pub fn new(pod_key: impl Into<String>, pod_ip: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            pod_key: pod_key.into(),
            pod_ip: pod_ip.into(),
            model_name: model_name.into(),
            pub_port: 5557,
            router_port: 5558,
            poll_timeout: Duration::from_millis(100),
            replay_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_interval: Duration::from_secs(30),
            reconnect_backoff_factor: 2.0,
            topic: String::new(),
        }
    }

    /// Set the event channel port.
    #[must_use]
    pub const fn with_pub_port(mut self, port: u16) -> Self {
        self.pub_port = port;
        self
    }

    /// Set the replay channel port.
    #[must_use]
    pub const fn with_router_port(mut self, port: u16) -> Self {
        self.router_port = port;
        self
    }

    /// Set the socket poll interval.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the replay request/reply timeout.
    #[must_use]
    pub const fn with_replay_timeout(mut self, timeout: Duration) -> Self {
        self.replay_timeout = timeout;
        self
    }

    /// Set the initial reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the maximum reconnect interval.
    #[must_use]
    pub const fn with_max_reconnect_interval(mut self, max: Duration) -> Self {
        self.max_reconnect_interval = max;
        self
    }

    /// Set the backoff multiplier applied per failed attempt.
    #[must_use]
    pub const fn with_reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the topic filter.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }
}

/// Tokenizer backend selector for `StoreConfig::tokenizer_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerType {
    /// Per-character tokenization (the default, unusable with KV sync).
    Character,
    /// A remote tokenizer service matching the engine's own tokenizer.
    Remote,
}

impl Default for TokenizerType {
    fn default() -> Self {
        Self::Character
    }
}

/// Process-wide feature configuration for the KV-sync store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Master switch for the feature.
    pub kv_sync_enabled: bool,
    /// Must be true when `kv_sync_enabled`.
    pub use_remote_tokenizer: bool,
    /// Must be `Remote` when `kv_sync_enabled`.
    pub tokenizer_type: TokenizerType,
    /// Must be non-empty when `kv_sync_enabled`.
    pub remote_tokenizer_endpoint: String,
    /// Per-subscriber in-flight event buffer size.
    pub buffer_size: usize,
    /// Level-1 (model context) eviction bound.
    pub max_contexts: usize,
    /// Level-2 (block) eviction bound per context.
    pub max_prefixes_per_context: usize,
    /// Eviction sweep period.
    pub eviction_interval: Duration,
    /// Routing imbalance threshold (absolute request-count delta).
    pub imbalance_abs_count: u64,
    /// Routing load filter: qualify pods within `mean + factor * stddev`.
    pub std_dev_factor: f64,
    /// Tokens per prefix-chunk; must match the engine's block size.
    pub block_size: usize,
    /// Tokenizer HTTP request timeout.
    pub tokenizer_timeout: Duration,
    /// Tokenizer HTTP retry budget.
    pub tokenizer_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kv_sync_enabled: false,
            use_remote_tokenizer: false,
            tokenizer_type: TokenizerType::Character,
            remote_tokenizer_endpoint: String::new(),
            buffer_size: 10_000,
            max_contexts: 1_000,
            max_prefixes_per_context: 10_000,
            eviction_interval: Duration::from_secs(60),
            imbalance_abs_count: 8,
            std_dev_factor: 1.0,
            block_size: 16,
            tokenizer_timeout: Duration::from_secs(30),
            tokenizer_retries: 3,
        }
    }
}

impl StoreConfig {
    /// Start from defaults with the feature enabled and required tokenizer fields set.
    #[must_use]
    pub fn enabled(remote_tokenizer_endpoint: impl Into<String>) -> Self {
        Self {
            kv_sync_enabled: true,
            use_remote_tokenizer: true,
            tokenizer_type: TokenizerType::Remote,
            remote_tokenizer_endpoint: remote_tokenizer_endpoint.into(),
            ..Self::default()
        }
    }

    /// Set the eviction bounds.
    #[must_use]
    pub const fn with_eviction_bounds(mut self, max_contexts: usize, max_prefixes_per_context: usize) -> Self {
        self.max_contexts = max_contexts;
        self.max_prefixes_per_context = max_prefixes_per_context;
        self
    }

    /// Set the eviction sweep interval.
    #[must_use]
    pub const fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Set the routing imbalance threshold and standard-deviation factor.
    #[must_use]
    pub const fn with_routing_thresholds(mut self, imbalance_abs_count: u64, std_dev_factor: f64) -> Self {
        self.imbalance_abs_count = imbalance_abs_count;
        self.std_dev_factor = std_dev_factor;
        self
    }

    /// Set the prefix-chunking block size.
    #[must_use]
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Validate the configuration per the initialization contract (§4.3):
    /// succeeds iff KV-sync is enabled, a remote tokenizer is configured, and
    /// an endpoint is present.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.kv_sync_enabled {
            return Err(crate::error::SyncError::config("kv sync is disabled"));
        }
        if !self.use_remote_tokenizer {
            return Err(crate::error::SyncError::config(
                "remote tokenizer must be enabled when kv sync is enabled",
            ));
        }
        if self.tokenizer_type != TokenizerType::Remote {
            return Err(crate::error::SyncError::config(
                "tokenizer type must be Remote when kv sync is enabled",
            ));
        }
        if self.remote_tokenizer_endpoint.is_empty() {
            return Err(crate::error::SyncError::config(
                "remote tokenizer endpoint must be set when kv sync is enabled",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_config_defaults_match_spec() {
        let cfg = PodSubscriberConfig::new("ns/p0", "10.0.0.1", "m");
        assert_eq!(cfg.pub_port, 5557);
        assert_eq!(cfg.router_port, 5558);
        assert_eq!(cfg.poll_timeout, Duration::from_millis(100));
        assert_eq!(cfg.replay_timeout, Duration::from_secs(5));
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(500));
        assert_eq!(cfg.max_reconnect_interval, Duration::from_secs(30));
        assert!((cfg.reconnect_backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.topic, "");
    }

    #[test]
    fn store_config_disabled_by_default_fails_validation() {
        assert!(StoreConfig::default().validate().is_err());
    }

    #[test]
    fn store_config_enabled_with_endpoint_validates() {
        let cfg = StoreConfig::enabled("http://tokenizer:8000");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn store_config_enabled_without_endpoint_fails() {
        let cfg = StoreConfig::enabled("");
        assert!(cfg.validate().is_err());
    }
}
