//! JSON-RPC chain client over HTTP
//!
//! Plain request/response JSON-RPC 2.0. No websocket subscriptions; every
//! piece of network state the engine consumes is a point-in-time read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{CallRequest, ChainClient, TxReceipt};

/// JSON-RPC request envelope
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client
pub struct HttpRpcClient {
    http: Client,
    endpoint: String,
    timeout_ms: u64,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(endpoint: &str, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            timeout_ms,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!("RPC request: {}", method);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RpcTimeout(self.timeout_ms)
                } else {
                    Error::from(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::Rpc(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let parsed: RpcResponse = response.json().await?;

        if let Some(err) = parsed.error {
            warn!("RPC error from {}: {} ({})", method, err.message, err.code);
            return Err(Error::Rpc(format!("{}: {}", method, err.message)));
        }

        parsed
            .result
            .ok_or_else(|| Error::Rpc(format!("{}: empty result", method)))
    }

    fn call_to_params(call: &CallRequest) -> Value {
        let mut obj = serde_json::Map::new();
        if let Some(from) = call.from {
            obj.insert("from".into(), json!(format!("{:#x}", from)));
        }
        obj.insert("to".into(), json!(format!("{:#x}", call.to)));
        if !call.value.is_zero() {
            obj.insert("value".into(), json!(format!("{:#x}", call.value)));
        }
        if !call.data.is_empty() {
            obj.insert("data".into(), json!(format!("{}", call.data)));
        }
        Value::Object(obj)
    }
}

fn parse_quantity_u64(value: &Value, what: &str) -> Result<u64> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Rpc(format!("{}: non-string quantity", what)))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Rpc(format!("{}: bad quantity {}: {}", what, s, e)))
}

fn parse_quantity_u128(value: &Value, what: &str) -> Result<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Rpc(format!("{}: non-string quantity", what)))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Rpc(format!("{}: bad quantity {}: {}", what, s, e)))
}

fn parse_quantity_u256(value: &Value, what: &str) -> Result<U256> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Rpc(format!("{}: non-string quantity", what)))?;
    U256::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Rpc(format!("{}: bad quantity {}: {}", what, s, e)))
}

fn parse_bytes(value: &Value, what: &str) -> Result<Bytes> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Rpc(format!("{}: non-string data", what)))?;
    s.parse::<Bytes>()
        .map_err(|e| Error::Rpc(format!("{}: bad hex data: {}", what, e)))
}

#[async_trait]
impl ChainClient for HttpRpcClient {
    async fn transaction_count(&self, address: Address) -> Result<u64> {
        // "pending" so locally queued transactions count toward the nonce
        let result = self
            .request(
                "eth_getTransactionCount",
                json!([format!("{:#x}", address), "pending"]),
            )
            .await?;
        parse_quantity_u64(&result, "eth_getTransactionCount")
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64> {
        let result = self
            .request("eth_estimateGas", json!([Self::call_to_params(call)]))
            .await
            .map_err(|e| Error::GasEstimation(e.to_string()))?;
        parse_quantity_u64(&result, "eth_estimateGas")
    }

    async fn base_fee(&self) -> Result<u128> {
        let result = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await
            .map_err(|e| Error::FeeData(e.to_string()))?;
        let fee = result
            .get("baseFeePerGas")
            .ok_or_else(|| Error::FeeData("block has no baseFeePerGas".into()))?;
        parse_quantity_u128(fee, "baseFeePerGas").map_err(|e| Error::FeeData(e.to_string()))
    }

    async fn priority_fee(&self) -> Result<u128> {
        let result = self
            .request("eth_maxPriorityFeePerGas", json!([]))
            .await
            .map_err(|e| Error::FeeData(e.to_string()))?;
        parse_quantity_u128(&result, "eth_maxPriorityFeePerGas")
            .map_err(|e| Error::FeeData(e.to_string()))
    }

    async fn gas_price(&self) -> Result<u128> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        parse_quantity_u128(&result, "eth_gasPrice")
    }

    async fn call(&self, call: &CallRequest) -> Result<Bytes> {
        let result = self
            .request("eth_call", json!([Self::call_to_params(call), "latest"]))
            .await
            .map_err(|e| Error::Simulation(e.to_string()))?;
        parse_bytes(&result, "eth_call")
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        let result = self
            .request("eth_sendRawTransaction", json!([format!("{}", raw)]))
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;
        let s = result
            .as_str()
            .ok_or_else(|| Error::Submission("non-string tx hash".into()))?;
        s.parse::<B256>()
            .map_err(|e| Error::Submission(format!("bad tx hash {}: {}", s, e)))
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let result = self
            .request(
                "eth_getTransactionReceipt",
                json!([format!("{:#x}", tx_hash)]),
            )
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let block_number = parse_quantity_u64(
            result
                .get("blockNumber")
                .ok_or_else(|| Error::Rpc("receipt missing blockNumber".into()))?,
            "receipt.blockNumber",
        )?;
        let status = result
            .get("status")
            .map(|v| parse_quantity_u64(v, "receipt.status"))
            .transpose()?
            .unwrap_or(1)
            == 1;
        let gas_used = result
            .get("gasUsed")
            .map(|v| parse_quantity_u64(v, "receipt.gasUsed"))
            .transpose()?
            .unwrap_or(0);
        let effective_gas_price = result
            .get("effectiveGasPrice")
            .map(|v| parse_quantity_u128(v, "receipt.effectiveGasPrice"))
            .transpose()?
            .unwrap_or(0);

        Ok(Some(TxReceipt {
            tx_hash,
            block_number,
            status,
            gas_used,
            effective_gas_price,
        }))
    }

    async fn block_number(&self) -> Result<u64> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity_u64(&result, "eth_blockNumber")
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let result = self
            .request(
                "eth_getBalance",
                json!([format!("{:#x}", address), "latest"]),
            )
            .await?;
        parse_quantity_u256(&result, "eth_getBalance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantities() {
        assert_eq!(parse_quantity_u64(&json!("0x10"), "t").unwrap(), 16);
        assert_eq!(parse_quantity_u128(&json!("0x0"), "t").unwrap(), 0);
        assert!(parse_quantity_u64(&json!("zzz"), "t").is_err());
        assert!(parse_quantity_u64(&json!(42), "t").is_err());
    }

    #[test]
    fn test_call_params_shape() {
        let call = CallRequest::new(
            Address::repeat_byte(0x11),
            U256::from(1000u64),
            Bytes::from(vec![0xde, 0xad]),
        );
        let params = HttpRpcClient::call_to_params(&call);
        assert_eq!(
            params["to"],
            json!("0x1111111111111111111111111111111111111111")
        );
        assert_eq!(params["value"], json!("0x3e8"));
        assert_eq!(params["data"], json!("0xdead"));
        assert!(params.get("from").is_none());
    }

    #[test]
    fn test_zero_value_omitted() {
        let call = CallRequest::new(Address::ZERO, U256::ZERO, Bytes::new());
        let params = HttpRpcClient::call_to_params(&call);
        assert!(params.get("value").is_none());
        assert!(params.get("data").is_none());
    }
}
