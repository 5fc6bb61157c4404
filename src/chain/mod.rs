//! Chain access layer
//!
//! Everything the engine needs from the network goes through the
//! [`ChainClient`] trait so the policy core never depends on a specific
//! transport. The production implementation is a JSON-RPC client over HTTP.

pub mod rpc;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::error::Result;

pub use rpc::HttpRpcClient;

/// A read-only call shape, used for simulation and gas estimation
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    /// Sender, when the call needs one (balance checks inside simulation)
    pub from: Option<Address>,
    /// Destination contract or recipient
    pub to: Address,
    /// Native value in wei
    pub value: U256,
    /// Calldata
    pub data: Bytes,
}

impl CallRequest {
    pub fn new(to: Address, value: U256, data: Bytes) -> Self {
        Self {
            from: None,
            to,
            value,
            data,
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// Minimal receipt view used for confirmation tracking
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// true = success, false = reverted on-chain
    pub status: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

/// Network operations the engine depends on
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Confirmed + pending transaction count for an account
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Raw gas estimate for a call
    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64>;

    /// Current block base fee in wei
    async fn base_fee(&self) -> Result<u128>;

    /// Suggested priority fee in wei
    async fn priority_fee(&self) -> Result<u128>;

    /// Current gas price in wei (legacy view, used for the submission-time cap)
    async fn gas_price(&self) -> Result<u128>;

    /// Read-only execution against current state
    async fn call(&self, call: &CallRequest) -> Result<Bytes>;

    /// Submit a signed raw transaction, returning its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256>;

    /// Receipt lookup; None while the transaction is unmined
    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>>;

    /// Current head block number
    async fn block_number(&self) -> Result<u64>;

    /// Native balance in wei
    async fn balance(&self, address: Address) -> Result<U256>;
}
