//! Subscriber lifecycle event monitoring.
//!
//! Provides an event stream for tracking pod subscriber connection health:
//! connects, disconnects, and reconnect scheduling. Exists so the event
//! manager (or an operator) can observe subscriber health without coupling
//! to the subscriber's internals.

use std::fmt;
use std::time::Duration;

/// Pod subscriber lifecycle events.
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// Both sockets are open; state machine entered `Connected`.
    Connected {
        /// `namespace/name` identity of the pod.
        pod_key: String,
    },

    /// Socket error or explicit stop dropped the subscriber to `Disconnected`.
    Disconnected {
        /// `namespace/name` identity of the pod.
        pod_key: String,
        /// Human-readable reason, if known.
        reason: String,
    },

    /// A connection attempt failed; reconnect has been scheduled.
    ReconnectScheduled {
        /// `namespace/name` identity of the pod.
        pod_key: String,
        /// Delay before the next attempt.
        delay: Duration,
        /// Attempt number (1 = first retry after the initial failure).
        attempt: u32,
    },

    /// The subscriber is draining (closing sockets, cancelling replays) after `Stop`.
    Draining {
        /// `namespace/name` identity of the pod.
        pod_key: String,
    },
}

impl fmt::Display for SubscriberEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { pod_key } => write!(f, "{pod_key}: connected"),
            Self::Disconnected { pod_key, reason } => {
                write!(f, "{pod_key}: disconnected ({reason})")
            }
            Self::ReconnectScheduled {
                pod_key,
                delay,
                attempt,
            } => write!(f, "{pod_key}: reconnect attempt {attempt} in {delay:?}"),
            Self::Draining { pod_key } => write!(f, "{pod_key}: draining"),
        }
    }
}

/// Handle for receiving subscriber events.
pub type SubscriberMonitor = flume::Receiver<SubscriberEvent>;

/// Internal sender for subscriber events, exposed so the subscriber event
/// loop can emit them.
pub type SubscriberEventSender = flume::Sender<SubscriberEvent>;

/// Create a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (SubscriberEventSender, SubscriberMonitor) {
    flume::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_event_displays_pod_key() {
        let event = SubscriberEvent::Connected {
            pod_key: "ns/pod-0".to_string(),
        };
        assert_eq!(event.to_string(), "ns/pod-0: connected");
    }

    #[test]
    fn monitor_channel_round_trips_events() {
        let (sender, receiver) = create_monitor();
        sender
            .send(SubscriberEvent::Connected {
                pod_key: "ns/pod-0".to_string(),
            })
            .unwrap();

        let event = receiver.recv().unwrap();
        assert!(matches!(event, SubscriberEvent::Connected { .. }));
    }
}
