//! Remote tokenizer client (§1 out-of-scope collaborator, §4.5 step 1).
//!
//! The engine and the router must tokenize identically for prefix matches
//! to mean anything, so this talks to the same remote tokenizer service
//! the engine was configured with — never a local approximation.

use kvroute_core::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Turns request text into the token ids the engine would assign.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<i32>>;
}

#[derive(Serialize)]
struct TokenizeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TokenizeResponse {
    token_ids: Vec<i32>,
}

/// HTTP client for a remote tokenizer service, with a bounded retry budget.
pub struct RemoteTokenizer {
    client: reqwest::blocking::Client,
    endpoint: String,
    retries: u32,
}

impl RemoteTokenizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, retries: u32) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::config(format!("failed to build tokenizer http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            retries,
        })
    }
}

impl Tokenizer for RemoteTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        let mut last_err = None;
        for attempt in 0..=self.retries {
            let result = self
                .client
                .post(&self.endpoint)
                .json(&TokenizeRequest { text })
                .send()
                .and_then(reqwest::blocking::Response::error_for_status)
                .and_then(|resp| resp.json::<TokenizeResponse>());

            match result {
                Ok(body) => return Ok(body.token_ids),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "tokenizer request failed, retrying");
                    last_err = Some(e);
                }
            }
        }
        Err(SyncError::TokenizerError(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown tokenizer error".to_string()),
        ))
    }
}

/// Per-character tokenizer: the configuration default (§6), explicitly
/// unusable with KV sync (`StoreConfig::validate` rejects it when enabled)
/// but kept so a disabled store still has a trivial tokenizer available.
pub struct CharacterTokenizer;

impl Tokenizer for CharacterTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        Ok(text.bytes().map(i32::from).collect())
    }
}
