//! Hardware signing stub
//!
//! The hardware signer cannot yet sign non-interactively, so this backend
//! refuses both signing calls. It still answers reads (address, balances,
//! nonce), and the manual wallet tier uses [`PreparedTransaction::describe`]
//! to hand the operator a signable description instead of a signature.
//!
//! [`PreparedTransaction::describe`]: super::PreparedTransaction::describe

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::chain::ChainClient;
use crate::error::{Error, Result};

use super::{erc20_balance, PreparedTransaction, SigningBackend};

/// Read-only backend for a hardware-held key
pub struct HardwareStubSigner {
    address: Address,
    chain: Arc<dyn ChainClient>,
}

impl HardwareStubSigner {
    pub fn new(address: Address, chain: Arc<dyn ChainClient>) -> Self {
        Self { address, chain }
    }
}

#[async_trait]
impl SigningBackend for HardwareStubSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance(&self, token: Option<Address>) -> Result<U256> {
        match token {
            None => self.chain.balance(self.address).await,
            Some(token) => erc20_balance(&self.chain, token, self.address).await,
        }
    }

    async fn sign_and_send(&self, _tx: &PreparedTransaction) -> Result<B256> {
        Err(Error::Signer(
            "hardware backend cannot sign non-interactively; use prepare_for_signing".into(),
        ))
    }

    async fn sign_only(&self, _tx: &PreparedTransaction) -> Result<Bytes> {
        Err(Error::Signer(
            "hardware backend cannot sign non-interactively; use prepare_for_signing".into(),
        ))
    }

    async fn next_nonce(&self) -> Result<u64> {
        // No local cursor; the external signer owns submission ordering
        self.chain.transaction_count(self.address).await
    }

    async fn reset_nonce(&self) {}
}
