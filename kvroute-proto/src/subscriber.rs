//! Per-pod subscriber: owns the event (SUB) and replay (REQ) sockets for
//! one engine pod, runs a blocking poll loop on a dedicated OS thread, and
//! dispatches decoded events to an injected [`EventDispatcher`].
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Draining`.
//! `Connected -> Disconnected` on any socket error; `Connected -> Draining`
//! on `stop()`, which closes both sockets and returns from `run`.

use crate::codec;
use crate::metrics::SubscriberMetrics;
use kvroute_core::config::PodSubscriberConfig;
use kvroute_core::error::{Result, SyncError};
use kvroute_core::event::KvEvent;
use kvroute_core::monitor::{SubscriberEvent, SubscriberEventSender};
use kvroute_core::reconnect::ReconnectState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Receives events dispatched by a running [`PodSubscriber`].
///
/// Implemented by the event manager in the `kvroute` crate; kept as a
/// trait here so this crate never depends on the prefix index directly.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, pod_key: &str, event: KvEvent);
}

/// Lifecycle state of a pod subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
}

struct Sockets {
    sub: zmq::Socket,
    req: zmq::Socket,
}

/// Drives the event loop for one engine pod.
pub struct PodSubscriber {
    config: PodSubscriberConfig,
    state: SubscriberState,
    ctx: zmq::Context,
    sockets: Option<Sockets>,
    last_seq: Option<u64>,
    reconnect: ReconnectState,
    monitor_tx: SubscriberEventSender,
    metrics: Arc<SubscriberMetrics>,
    stop: Arc<AtomicBool>,
}

impl PodSubscriber {
    #[must_use]
    pub fn new(config: PodSubscriberConfig, monitor_tx: SubscriberEventSender, metrics: Arc<SubscriberMetrics>) -> Self {
        let reconnect = ReconnectState::new(&config);
        Self {
            config,
            state: SubscriberState::Disconnected,
            ctx: zmq::Context::new(),
            sockets: None,
            last_seq: None,
            reconnect,
            monitor_tx,
            metrics,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clonable handle other threads can use to request shutdown.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    #[must_use]
    pub const fn state(&self) -> SubscriberState {
        self.state
    }

    fn pod_key(&self) -> &str {
        &self.config.pod_key
    }

    fn connect(&mut self) -> Result<()> {
        self.state = SubscriberState::Connecting;

        let sub = self
            .ctx
            .socket(zmq::SUB)
            .map_err(|e| SyncError::connect_transient(format!("sub socket: {e}")))?;
        sub.connect(&format!("tcp://{}:{}", self.config.pod_ip, self.config.pub_port))
            .map_err(|e| SyncError::connect_transient(format!("sub connect: {e}")))?;
        sub.set_subscribe(self.config.topic.as_bytes())
            .map_err(|e| SyncError::connect_transient(format!("sub subscribe: {e}")))?;

        let req = self
            .ctx
            .socket(zmq::REQ)
            .map_err(|e| SyncError::connect_transient(format!("req socket: {e}")))?;
        req.set_rcvtimeo(self.config.replay_timeout.as_millis() as i32)
            .map_err(|e| SyncError::connect_transient(format!("req rcvtimeo: {e}")))?;
        req.connect(&format!("tcp://{}:{}", self.config.pod_ip, self.config.router_port))
            .map_err(|e| SyncError::connect_transient(format!("req connect: {e}")))?;

        self.sockets = Some(Sockets { sub, req });
        self.state = SubscriberState::Connected;
        self.reconnect.reset();
        self.last_seq = None;
        self.metrics.connections_total.with_label_values(&[self.pod_key()]).inc();
        self.metrics.connection_status.with_label_values(&[self.pod_key()]).set(1);
        let _ = self.monitor_tx.send(SubscriberEvent::Connected {
            pod_key: self.config.pod_key.clone(),
        });
        info!(pod_key = %self.config.pod_key, "subscriber connected");
        Ok(())
    }

    fn disconnect(&mut self, reason: &str) {
        self.sockets = None;
        self.state = SubscriberState::Disconnected;
        self.metrics
            .disconnections_total
            .with_label_values(&[self.pod_key()])
            .inc();
        self.metrics.connection_status.with_label_values(&[self.pod_key()]).set(0);
        let _ = self.monitor_tx.send(SubscriberEvent::Disconnected {
            pod_key: self.config.pod_key.clone(),
            reason: reason.to_string(),
        });
        warn!(pod_key = %self.config.pod_key, reason, "subscriber disconnected");
    }

    /// Run the event loop until `stop()` is observed. Reconnects
    /// indefinitely with capped exponential backoff on connection errors.
    pub fn run(&mut self, dispatcher: &dyn EventDispatcher) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                self.enter_draining();
                return;
            }

            if self.sockets.is_none() {
                if let Err(e) = self.connect() {
                    let delay = self.reconnect.next_delay();
                    self.metrics
                        .reconnect_attempts_total
                        .with_label_values(&[self.pod_key()])
                        .inc();
                    let _ = self.monitor_tx.send(SubscriberEvent::ReconnectScheduled {
                        pod_key: self.config.pod_key.clone(),
                        delay,
                        attempt: self.reconnect.attempt(),
                    });
                    warn!(pod_key = %self.config.pod_key, error = %e, ?delay, "connect failed, backing off");
                    sleep_or_stop(delay, &self.stop);
                    continue;
                }
            }

            if let Err(e) = self.poll_once(dispatcher) {
                if e.is_connection_error() {
                    self.disconnect(&e.to_string());
                } else {
                    self.metrics
                        .errors_total
                        .with_label_values(&[self.pod_key(), error_kind(&e)])
                        .inc();
                    error!(pod_key = %self.config.pod_key, error = %e, "non-fatal subscriber error");
                }
            }
        }
    }

    fn enter_draining(&mut self) {
        self.state = SubscriberState::Draining;
        let _ = self.monitor_tx.send(SubscriberEvent::Draining {
            pod_key: self.config.pod_key.clone(),
        });
        self.sockets = None;
        self.state = SubscriberState::Disconnected;
    }

    fn poll_once(&mut self, dispatcher: &dyn EventDispatcher) -> Result<()> {
        let Some(sockets) = &self.sockets else {
            return Err(SyncError::connect_transient("not connected"));
        };

        let mut items = [sockets.sub.as_poll_item(zmq::POLLIN)];
        let timeout_ms = self.config.poll_timeout.as_millis() as i64;
        let n = zmq::poll(&mut items, timeout_ms).map_err(|e| SyncError::connect_transient(e.to_string()))?;
        if n == 0 || !items[0].is_readable() {
            return Ok(());
        }

        let frames = sockets
            .sub
            .recv_multipart(0)
            .map_err(|e| SyncError::connect_transient(e.to_string()))?;
        self.handle_frames(&frames, dispatcher)
    }

    fn handle_frames(&mut self, frames: &[Vec<u8>], dispatcher: &dyn EventDispatcher) -> Result<()> {
        let [_topic, seq_bytes, payload] = frames else {
            return Err(SyncError::decode("event frame did not have 3 parts"));
        };
        let seq_array: [u8; 8] = seq_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SyncError::decode("sequence frame was not 8 bytes"))?;
        let seq = u64::from_be_bytes(seq_array);

        let in_order = self.last_seq.map_or(true, |last| seq == last + 1);
        if !in_order {
            let last = self.last_seq.unwrap_or(0);
            let missed = seq.saturating_sub(last).saturating_sub(1);
            self.metrics
                .missed_events_total
                .with_label_values(&[self.pod_key()])
                .inc_by(missed);
            debug!(pod_key = %self.config.pod_key, last_seq = last, seq, missed, "sequence gap, requesting replay");
            if self.replay(last, seq, dispatcher).is_err() {
                // Replay failed: leave last_seq unchanged, a later sequence will re-trigger.
                return Ok(());
            }
        }

        self.apply_payload(seq, payload, dispatcher)
    }

    fn replay(&mut self, from_seq: u64, to_seq: u64, dispatcher: &dyn EventDispatcher) -> Result<()> {
        self.metrics.replay_requests_total.with_label_values(&[self.pod_key()]).inc();
        let result = self.request_replay(from_seq, to_seq);
        match result {
            Ok(batches) => {
                self.metrics.replay_success_total.with_label_values(&[self.pod_key()]).inc();
                for (seq, batch) in batches {
                    for event in batch.events {
                        self.dispatch_one(dispatcher, event);
                    }
                    self.last_seq = Some(seq);
                    self.metrics.last_sequence.with_label_values(&[self.pod_key()]).set(seq as i64);
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.replay_failure_total.with_label_values(&[self.pod_key()]).inc();
                warn!(pod_key = %self.config.pod_key, error = %e, "replay request failed");
                Err(e)
            }
        }
    }

    fn request_replay(&self, from_seq: u64, to_seq: u64) -> Result<Vec<(u64, kvroute_core::event::EventBatch)>> {
        let Some(sockets) = &self.sockets else {
            return Err(SyncError::connect_transient("not connected"));
        };
        let request = codec::encode_replay_request(from_seq, to_seq);
        sockets
            .req
            .send(request, 0)
            .map_err(|e| SyncError::connect_transient(format!("replay send: {e}")))?;
        let reply = sockets
            .req
            .recv_bytes(0)
            .map_err(|e| SyncError::connect_transient(format!("replay recv: {e}")))?;
        codec::decode_replay_response(&reply)
    }

    fn apply_payload(&mut self, seq: u64, payload: &[u8], dispatcher: &dyn EventDispatcher) -> Result<()> {
        let batch = codec::decode_batch(payload)?;

        for event in batch.events {
            self.dispatch_one(dispatcher, event);
        }
        self.last_seq = Some(seq);
        self.metrics.last_sequence.with_label_values(&[self.pod_key()]).set(seq as i64);
        Ok(())
    }

    fn dispatch_one(&self, dispatcher: &dyn EventDispatcher, event: KvEvent) {
        let kind = event_kind(&event);
        self.metrics
            .events_received_total
            .with_label_values(&[self.pod_key(), kind])
            .inc();
        let start = Instant::now();
        dispatcher.dispatch(self.pod_key(), event);
        self.metrics
            .processing_duration_seconds
            .with_label_values(&[self.pod_key(), kind])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .events_processed_total
            .with_label_values(&[self.pod_key(), kind])
            .inc();
    }
}

fn event_kind(event: &KvEvent) -> &'static str {
    match event {
        KvEvent::BlockStored { .. } => "block_stored",
        KvEvent::BlockRemoved { .. } => "block_removed",
        KvEvent::AllCleared { .. } => "all_cleared",
    }
}

fn error_kind(error: &SyncError) -> &'static str {
    match error {
        SyncError::Io(_) => "io",
        SyncError::ConfigInvalid(_) => "config",
        SyncError::ConnectTransient(_) => "connect",
        SyncError::Decode(_) => "decode",
        SyncError::Gap { .. } => "gap",
        SyncError::Dispatch(_) => "dispatch",
        SyncError::TokenizerError(_) => "tokenizer",
        SyncError::Shutdown(_) => "shutdown",
        SyncError::Timeout(_) => "timeout",
    }
}

fn sleep_or_stop(delay: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20).min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvroute_core::config::PodSubscriberConfig;
    use kvroute_core::event::EventBatch;
    use kvroute_core::monitor::create_monitor;
    use prometheus::Registry;
    use std::sync::Mutex;

    struct RecordingDispatcher {
        events: Mutex<Vec<(String, KvEvent)>>,
    }

    impl RecordingDispatcher {
        fn new() -> Self {
            Self { events: Mutex::new(Vec::new()) }
        }
    }

    impl EventDispatcher for RecordingDispatcher {
        fn dispatch(&self, pod_key: &str, event: KvEvent) {
            self.events.lock().unwrap().push((pod_key.to_string(), event));
        }
    }

    fn test_subscriber(pod_ip: &str, pub_port: u16, router_port: u16) -> PodSubscriber {
        let cfg = PodSubscriberConfig::new("ns/p0", pod_ip, "M")
            .with_pub_port(pub_port)
            .with_router_port(router_port)
            .with_poll_timeout(Duration::from_millis(50))
            .with_replay_timeout(Duration::from_millis(500));
        let (tx, _rx) = create_monitor();
        let registry = Registry::new();
        let metrics = Arc::new(SubscriberMetrics::new(&registry).unwrap());
        PodSubscriber::new(cfg, tx, metrics)
    }

    #[test]
    fn starts_disconnected() {
        let sub = test_subscriber("127.0.0.1", 15557, 15558);
        assert_eq!(sub.state(), SubscriberState::Disconnected);
    }

    #[test]
    fn in_order_seq_dispatches_without_replay() {
        let pub_port = portpicker::pick_unused_port().unwrap();
        let router_port = portpicker::pick_unused_port().unwrap();
        let mut sub = test_subscriber("127.0.0.1", pub_port, router_port);
        sub.connect().unwrap();

        let batch = EventBatch {
            events: vec![KvEvent::AllCleared {
                timestamp: 1,
                model_name: "M".to_string(),
            }],
        };
        let payload = codec::encode_batch(&batch);
        let dispatcher = RecordingDispatcher::new();

        sub.last_seq = Some(5);
        sub.handle_frames(&[Vec::new(), 6u64.to_be_bytes().to_vec(), payload], &dispatcher)
            .unwrap();

        assert_eq!(sub.last_seq, Some(6));
        assert_eq!(dispatcher.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_frame_count_is_rejected() {
        let mut sub = test_subscriber("127.0.0.1", 15559, 15560);
        let dispatcher = RecordingDispatcher::new();
        let result = sub.handle_frames(&[Vec::new()], &dispatcher);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_sequence_width_is_rejected() {
        let mut sub = test_subscriber("127.0.0.1", 15561, 15562);
        let dispatcher = RecordingDispatcher::new();
        let result = sub.handle_frames(&[Vec::new(), vec![1, 2, 3], Vec::new()], &dispatcher);
        assert!(result.is_err());
    }
}
