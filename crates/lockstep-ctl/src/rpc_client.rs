use anyhow::{bail, Context};

use lockstep_rpc::{RpcHealth, RpcSwap};

/// Simple JSON-RPC 2.0 client used by the CLI to talk to a running
/// coordinator.
///
/// Uses raw HTTP POST with serde_json rather than the full jsonrpsee client
/// to keep the binary lean and dependency-minimal.
pub struct CtlClient {
    url: String,
    client: reqwest::Client,
}

impl CtlClient {
    pub fn new(url: &str) -> Self {
        Self { url: url.to_string(), client: reqwest::Client::new() }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to coordinator at {}", self.url))?;

        let json: serde_json::Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            bail!("RPC error: {}", err);
        }

        Ok(json["result"].clone())
    }

    pub async fn health(&self) -> anyhow::Result<RpcHealth> {
        let result = self.call("lockstep_health", serde_json::json!([])).await?;
        serde_json::from_value(result).context("parsing health response")
    }

    pub async fn list_active_swaps(&self) -> anyhow::Result<Vec<RpcSwap>> {
        let result = self.call("lockstep_listActiveSwaps", serde_json::json!([])).await?;
        serde_json::from_value(result).context("parsing swap list")
    }

    pub async fn get_swap(&self, swap_id: &str) -> anyhow::Result<Option<RpcSwap>> {
        let result = self.call("lockstep_getSwap", serde_json::json!([swap_id])).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result).map(Some).context("parsing swap")
    }

    pub async fn force_refund(&self, swap_id: &str) -> anyhow::Result<RpcSwap> {
        let result = self.call("lockstep_forceRefund", serde_json::json!([swap_id])).await?;
        serde_json::from_value(result).context("parsing force-refund response")
    }
}
