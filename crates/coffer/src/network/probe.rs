use super::{failover::LivenessProbe, retry::RpcFault};
use eyre::Context as _;
use serde_json::Value;
use std::{future::Future, time::Duration};

pub const DEFAULT_PROBE_METHOD: &str = "eth_blockNumber";

/// Liveness check that POSTs a parameterless JSON-RPC call and expects a block height back.
#[derive(Debug, Clone)]
pub struct JsonRpcProbe {
    client: reqwest::Client,
    method: String,
}

impl JsonRpcProbe {
    pub fn new(method: &str, timeout: Duration) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            method: method.to_owned(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Current height reported by `endpoint`.
    pub async fn block_height(&self, endpoint: &str) -> eyre::Result<u64> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": self.method,
            "params": [],
        });
        let v: Value = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request", self.method))?
            .error_for_status()
            .with_context(|| format!("{} status", self.method))?
            .json()
            .await
            .with_context(|| format!("{} json", self.method))?;
        parse_height(&v)
    }
}

/// Extract a height from a JSON-RPC response. Accepts `"0x…"` hex strings, decimal strings
/// and plain integers (Solana `getSlot`, Aptos-style ledger info).
pub fn parse_height(v: &Value) -> eyre::Result<u64> {
    if let Some(err) = v.get("error") {
        let fault = RpcFault {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error")
                .to_owned(),
        };
        return Err(fault.into());
    }
    let result = v
        .get("result")
        .ok_or_else(|| eyre::eyre!("malformed rpc response: missing result"))?;
    if let Some(n) = result.as_u64() {
        return Ok(n);
    }
    let s = result
        .as_str()
        .ok_or_else(|| eyre::eyre!("malformed rpc response: result is not a height"))?;
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).context("malformed rpc response: bad hex height"),
        None => s.parse().context("malformed rpc response: bad height"),
    }
}

impl LivenessProbe for JsonRpcProbe {
    fn probe(&self, endpoint: &str) -> impl Future<Output = eyre::Result<()>> + Send {
        async move {
            let height = self.block_height(endpoint).await?;
            tracing::debug!(endpoint, height, "probe ok");
            Ok(())
        }
    }
}
