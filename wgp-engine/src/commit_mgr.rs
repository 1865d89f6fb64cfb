//! JSON-RPC client for the commit manager service.
//!
//! The commit manager owns the commitment log of every tracked shield
//! contract. All calls are `POST {url}/jsonrpc` with a JSON-RPC 2.0 body.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use wgp_commitment::{CommitLog, CommitLogError, LeafSubmission};
use wgp_common::Leaf;

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

const METHOD_GET_COMMITS: &str = "baseline_getCommits";
const METHOD_GET_TRACKED: &str = "baseline_getTracked";
const METHOD_TRACK: &str = "baseline_track";
const METHOD_VERIFY_AND_PUSH: &str = "baseline_verifyAndPush";

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Commit log backed by a remote commit manager.
#[derive(Clone)]
pub struct JsonRpcCommitLog {
    url: String,
    client: reqwest::Client,
}

impl JsonRpcCommitLog {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CommitLogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CommitLogError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: format!("{}/jsonrpc", base_url.trim_end_matches('/')),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the commit manager answers at all.
    pub async fn ping(&self) -> bool {
        self.get_tracked().await.is_ok()
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, CommitLogError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CommitLogError::Request(format!("{}: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CommitLogError::Request(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| CommitLogError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(CommitLogError::Rejected(format!("{}: {}", method, error)));
        }

        let result = body.result.unwrap_or(Value::Null);
        debug!(method, "commit manager call succeeded");
        serde_json::from_value(result)
            .map_err(|e| CommitLogError::InvalidResponse(format!("{}: {}", method, e)))
    }
}

/// `baseline_verifyAndPush` answers with the new leaf index, either bare or
/// as `{leafIndex}` / `{commitments: [{leafIndex}]}`.
fn pushed_leaf_index(result: &Value) -> Option<u64> {
    if let Some(index) = result.as_u64() {
        return Some(index);
    }
    if let Some(index) = result.get("leafIndex").and_then(Value::as_u64) {
        return Some(index);
    }
    result
        .get("commitments")?
        .as_array()?
        .first()?
        .get("leafIndex")?
        .as_u64()
}

#[async_trait]
impl CommitLog for JsonRpcCommitLog {
    async fn append_leaf(
        &self,
        shield: &str,
        leaf: &LeafSubmission,
    ) -> Result<u64, CommitLogError> {
        let params = json!([
            leaf.sender,
            shield,
            format!("0x{}", hex::encode(&leaf.proof)),
            leaf.public_inputs,
            leaf.value,
        ]);
        let result: Value = self.call(METHOD_VERIFY_AND_PUSH, params).await?;
        pushed_leaf_index(&result).ok_or_else(|| {
            CommitLogError::InvalidResponse(format!(
                "{} result carries no leaf index: {}",
                METHOD_VERIFY_AND_PUSH, result
            ))
        })
    }

    async fn get_leaves(
        &self,
        shield: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<Leaf>, CommitLogError> {
        let leaves: Option<Vec<Leaf>> = self
            .call(METHOD_GET_COMMITS, json!([shield, start, count]))
            .await?;
        Ok(leaves.unwrap_or_default())
    }

    async fn get_tracked(&self) -> Result<Vec<String>, CommitLogError> {
        let tracked: Option<Vec<String>> = self.call(METHOD_GET_TRACKED, json!([])).await?;
        Ok(tracked.unwrap_or_default())
    }

    async fn track(&self, shield: &str) -> Result<bool, CommitLogError> {
        self.call(METHOD_TRACK, json!([shield])).await
    }
}
