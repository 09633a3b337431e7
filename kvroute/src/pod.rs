//! Pod identity and subscription eligibility (§4.3, §6 pod discovery contract).

use std::collections::BTreeMap;

/// Pod label carrying the served model name. Required for eligibility.
pub const LABEL_MODEL_NAME: &str = "model.aibrix.ai/name";
/// Pod label that must be `"true"` for the pod to be subscribed.
pub const LABEL_KV_EVENTS_ENABLED: &str = "model.aibrix.ai/kv-events-enabled";
/// Optional pod label carrying a LoRA adapter id; `-1` if absent or malformed.
pub const LABEL_LORA_ID: &str = "model.aibrix.ai/lora-id";

/// Adapter id used when a pod carries no (or an unparseable) LoRA label.
pub const NO_ADAPTER: i64 = -1;

/// A subscribable pod: identity plus the fields the subscriber and index need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdentity {
    /// `namespace/name`.
    pub pod_key: String,
    pub pod_ip: String,
    pub model_name: String,
    pub adapter_id: i64,
}

impl PodIdentity {
    /// Build a `PodIdentity` iff the pod is eligible: running, has an IP,
    /// and carries `model.aibrix.ai/name` plus `kv-events-enabled=true`.
    /// Returns `None` otherwise (§4.3 eligibility rule).
    #[must_use]
    pub fn from_labels(
        pod_key: impl Into<String>,
        pod_ip: impl Into<String>,
        phase_running: bool,
        labels: &BTreeMap<String, String>,
    ) -> Option<Self> {
        if !phase_running {
            return None;
        }
        let pod_ip = pod_ip.into();
        if pod_ip.is_empty() {
            return None;
        }
        let model_name = labels.get(LABEL_MODEL_NAME)?.clone();
        if labels.get(LABEL_KV_EVENTS_ENABLED).map(String::as_str) != Some("true") {
            return None;
        }
        let adapter_id = labels
            .get(LABEL_LORA_ID)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(NO_ADAPTER);

        Some(Self {
            pod_key: pod_key.into(),
            pod_ip,
            model_name,
            adapter_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn eligible_pod_with_adapter_parses() {
        let labels = labels(&[
            (LABEL_MODEL_NAME, "llama-3-8b"),
            (LABEL_KV_EVENTS_ENABLED, "true"),
            (LABEL_LORA_ID, "7"),
        ]);
        let identity = PodIdentity::from_labels("ns/p0", "10.0.0.1", true, &labels).unwrap();
        assert_eq!(identity.model_name, "llama-3-8b");
        assert_eq!(identity.adapter_id, 7);
    }

    #[test]
    fn missing_adapter_label_defaults_to_no_adapter() {
        let labels = labels(&[(LABEL_MODEL_NAME, "m"), (LABEL_KV_EVENTS_ENABLED, "true")]);
        let identity = PodIdentity::from_labels("ns/p0", "10.0.0.1", true, &labels).unwrap();
        assert_eq!(identity.adapter_id, NO_ADAPTER);
    }

    #[test]
    fn malformed_adapter_label_defaults_to_no_adapter() {
        let labels = labels(&[
            (LABEL_MODEL_NAME, "m"),
            (LABEL_KV_EVENTS_ENABLED, "true"),
            (LABEL_LORA_ID, "not-a-number"),
        ]);
        let identity = PodIdentity::from_labels("ns/p0", "10.0.0.1", true, &labels).unwrap();
        assert_eq!(identity.adapter_id, NO_ADAPTER);
    }

    #[test]
    fn not_running_is_ineligible() {
        let labels = labels(&[(LABEL_MODEL_NAME, "m"), (LABEL_KV_EVENTS_ENABLED, "true")]);
        assert!(PodIdentity::from_labels("ns/p0", "10.0.0.1", false, &labels).is_none());
    }

    #[test]
    fn empty_ip_is_ineligible() {
        let labels = labels(&[(LABEL_MODEL_NAME, "m"), (LABEL_KV_EVENTS_ENABLED, "true")]);
        assert!(PodIdentity::from_labels("ns/p0", "", true, &labels).is_none());
    }

    #[test]
    fn missing_model_label_is_ineligible() {
        let labels = labels(&[(LABEL_KV_EVENTS_ENABLED, "true")]);
        assert!(PodIdentity::from_labels("ns/p0", "10.0.0.1", true, &labels).is_none());
    }

    #[test]
    fn kv_events_disabled_is_ineligible() {
        let labels = labels(&[(LABEL_MODEL_NAME, "m"), (LABEL_KV_EVENTS_ENABLED, "false")]);
        assert!(PodIdentity::from_labels("ns/p0", "10.0.0.1", true, &labels).is_none());
    }
}
