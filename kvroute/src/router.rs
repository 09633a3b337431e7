//! Prefix-cache-aware routing policy (§4.5): tokenize, check for load
//! imbalance, otherwise prefer prefix-matched pods within a load band.

use crate::tokenizer::Tokenizer;
use kvroute_core::config::StoreConfig;
use kvroute_core::index::{PodKey, PrefixIndex};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, warn};

/// The result of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub pod_key: PodKey,
}

/// Running-request-count collaborator (§1: metrics are an external
/// collaborator; this crate only declares the interface it needs).
pub trait RunningRequestCounts {
    fn get(&self, pod_key: &PodKey) -> u64;
}

/// Route one request to a pod for `model`/`adapter`.
///
/// `ready_pods` must be non-empty; returns `None` only in that case (the
/// caller has no pod to route to regardless of policy).
pub fn route(
    index: &PrefixIndex,
    tokenizer: &dyn Tokenizer,
    counts: &dyn RunningRequestCounts,
    cfg: &StoreConfig,
    model: &str,
    adapter: i64,
    message_text: &str,
    ready_pods: &HashSet<PodKey>,
) -> Option<RoutingDecision> {
    if ready_pods.is_empty() {
        return None;
    }

    let request_counts: Vec<(PodKey, u64)> = ready_pods.iter().map(|p| (p.clone(), counts.get(p))).collect();
    let min_count = request_counts.iter().map(|(_, c)| *c).min().unwrap_or(0);
    let max_count = request_counts.iter().map(|(_, c)| *c).max().unwrap_or(0);

    if max_count.saturating_sub(min_count) > cfg.imbalance_abs_count {
        let pod = pick_random_among_min(&request_counts, min_count);
        let tokens = tokenizer.tokenize(message_text).unwrap_or_default();
        let prefix_hashes = PrefixIndex::get_prefix_hashes(&tokens, cfg.block_size);
        record_and_return(index, model, adapter, pod, prefix_hashes)
    } else {
        let tokens = match tokenizer.tokenize(message_text) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(model, error = %e, "tokenizer error, falling back to least-request-count routing");
                let pod = pick_random_among_min(&request_counts, min_count);
                return Some(RoutingDecision { pod_key: pod });
            }
        };

        let prefix_match = index.match_prefix(model, adapter, &tokens, ready_pods, cfg.block_size);
        if prefix_match.matches.is_empty() {
            let pod = pick_random_among_min(&request_counts, min_count);
            return record_and_return(index, model, adapter, pod, prefix_match.prefix_hashes);
        }

        let pod = select_by_match_and_load(&prefix_match.matches, &request_counts, cfg.std_dev_factor)
            .unwrap_or_else(|| pick_random_among_min(&request_counts, min_count));
        record_and_return(index, model, adapter, pod, prefix_match.prefix_hashes)
    }
}

fn record_and_return(
    index: &PrefixIndex,
    model: &str,
    adapter: i64,
    pod: PodKey,
    prefix_hashes: Vec<u64>,
) -> Option<RoutingDecision> {
    if !prefix_hashes.is_empty() {
        if let Err(e) = index.add_prefix(model, adapter, &pod, &prefix_hashes) {
            debug!(model, pod_key = %pod, error = %e, "add_prefix failed");
        }
    }
    Some(RoutingDecision { pod_key: pod })
}

fn pick_random_among_min(counts: &[(PodKey, u64)], min_count: u64) -> PodKey {
    let candidates: Vec<&PodKey> = counts.iter().filter(|(_, c)| *c == min_count).map(|(p, _)| p).collect();
    candidates
        .choose(&mut rand::thread_rng())
        .map(|p| (*p).clone())
        .expect("counts is non-empty when ready_pods is non-empty")
}

/// From matched pods, sort by decreasing match percent, tie-break by
/// increasing request count, and pick the first within `mean + factor *
/// stddev` of the running-count distribution.
fn select_by_match_and_load(
    matches: &std::collections::HashMap<PodKey, u8>,
    request_counts: &[(PodKey, u64)],
    std_dev_factor: f64,
) -> Option<PodKey> {
    let counts: Vec<f64> = request_counts.iter().map(|(_, c)| *c as f64).collect();
    let mean = counts.iter().sum::<f64>() / counts.len() as f64;
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
    let stddev = variance.sqrt();
    let threshold = mean + std_dev_factor * stddev;

    let count_of = |pod: &PodKey| request_counts.iter().find(|(p, _)| p == pod).map_or(0, |(_, c)| *c);

    let mut candidates: Vec<(PodKey, u8, u64)> = matches
        .iter()
        .map(|(pod, pct)| (pod.clone(), *pct, count_of(pod)))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    candidates
        .into_iter()
        .find(|(_, _, count)| (*count as f64) <= threshold)
        .map(|(pod, _, _)| pod)
}
