//! Signing backends
//!
//! One capability interface over three signing technologies: a managed
//! remote signer behind an HTTP API, a local seed-derived key, and a
//! hardware stub that can only describe what it would sign. The pipeline
//! and wallet depend only on this shape.

pub mod hardware;
pub mod local;
pub mod managed;

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Serialize;

use crate::chain::{CallRequest, ChainClient};
use crate::error::{Error, Result};

pub use hardware::HardwareStubSigner;
pub use local::LocalSeedSigner;
pub use managed::ManagedApiSigner;

/// ERC-20 balanceOf(address)
const SELECTOR_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// A fully-resolved transaction, ready to sign
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub nonce: u64,
    pub chain_id: u64,
}

impl PreparedTransaction {
    /// Human-facing description for external signing flows
    pub fn describe(&self, summary: &str) -> SignableRequest {
        SignableRequest {
            to: format!("{:#x}", self.to),
            value_wei: self.value.to_string(),
            data: format!("{}", self.data),
            gas_limit: self.gas_limit,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            nonce: self.nonce,
            chain_id: self.chain_id,
            summary: summary.to_string(),
        }
    }
}

/// A signable description handed to an external (hardware) signer in place
/// of a signature
#[derive(Debug, Clone, Serialize)]
pub struct SignableRequest {
    pub to: String,
    pub value_wei: String,
    pub data: String,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub nonce: u64,
    pub chain_id: u64,
    pub summary: String,
}

/// Capability interface over a signing technology
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// The account this backend signs for
    fn address(&self) -> Address;

    /// Balance of the native asset (None) or an ERC-20 token
    async fn balance(&self, token: Option<Address>) -> Result<U256>;

    /// Sign and submit, returning the transaction hash
    async fn sign_and_send(&self, tx: &PreparedTransaction) -> Result<B256>;

    /// Sign without submitting, returning the raw signed bytes
    async fn sign_only(&self, tx: &PreparedTransaction) -> Result<Bytes>;

    /// Next nonce for this backend's account
    async fn next_nonce(&self) -> Result<u64>;

    /// Drop the local nonce cursor so the next issue resyncs from chain
    async fn reset_nonce(&self);
}

/// Query an ERC-20 balance via eth_call
pub(crate) async fn erc20_balance(
    chain: &Arc<dyn ChainClient>,
    token: Address,
    holder: Address,
) -> Result<U256> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&SELECTOR_BALANCE_OF);
    let mut holder_word = [0u8; 32];
    holder_word[12..].copy_from_slice(holder.as_slice());
    data.extend_from_slice(&holder_word);

    let call = CallRequest::new(token, U256::ZERO, Bytes::from(data));
    let output = chain.call(&call).await?;

    if output.len() < 32 {
        return Err(Error::Rpc(format!(
            "balanceOf returned {} bytes",
            output.len()
        )));
    }
    Ok(U256::from_be_slice(&output[..32]))
}
