//! Local seed-derived signing backend
//!
//! Holds a private key in process memory, signs EIP-1559 transactions and
//! submits the EIP-2718 encoding through the chain client. Nonce issuance
//! goes through the shared allocator so concurrent transactions for this
//! account serialize correctly.

use std::str::FromStr;
use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::debug;

use crate::chain::ChainClient;
use crate::error::{Error, Result};
use crate::nonce::NonceAllocator;

use super::{erc20_balance, PreparedTransaction, SigningBackend};

/// Signing backend backed by an in-process private key
pub struct LocalSeedSigner {
    signer: PrivateKeySigner,
    chain: Arc<dyn ChainClient>,
    nonces: Arc<NonceAllocator>,
}

impl LocalSeedSigner {
    pub fn new(signer: PrivateKeySigner, chain: Arc<dyn ChainClient>) -> Self {
        let nonces = Arc::new(NonceAllocator::new(Arc::clone(&chain)));
        Self {
            signer,
            chain,
            nonces,
        }
    }

    /// Construct from a hex-encoded private key
    pub fn from_hex_key(key: &str, chain: Arc<dyn ChainClient>) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(key.trim_start_matches("0x"))
            .map_err(|e| Error::InvalidSignerKey(e.to_string()))?;
        Ok(Self::new(signer, chain))
    }

    fn build_eip1559(&self, tx: &PreparedTransaction) -> TxEip1559 {
        TxEip1559 {
            chain_id: tx.chain_id,
            nonce: tx.nonce,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            max_fee_per_gas: tx.max_fee_per_gas,
            gas_limit: tx.gas_limit,
            to: TxKind::Call(tx.to),
            value: tx.value,
            access_list: Default::default(),
            input: tx.data.clone(),
        }
    }
}

#[async_trait]
impl SigningBackend for LocalSeedSigner {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn balance(&self, token: Option<Address>) -> Result<U256> {
        match token {
            None => self.chain.balance(self.address()).await,
            Some(token) => erc20_balance(&self.chain, token, self.address()).await,
        }
    }

    async fn sign_and_send(&self, tx: &PreparedTransaction) -> Result<B256> {
        let raw = self.sign_only(tx).await?;
        let hash = self.chain.send_raw_transaction(raw).await?;
        debug!("Submitted {} (nonce {})", hash, tx.nonce);
        Ok(hash)
    }

    async fn sign_only(&self, tx: &PreparedTransaction) -> Result<Bytes> {
        let mut inner = self.build_eip1559(tx);
        let signature = self
            .signer
            .sign_transaction_sync(&mut inner)
            .map_err(|e| Error::Signer(format!("sign failed: {}", e)))?;
        let envelope: TxEnvelope = inner.into_signed(signature).into();
        Ok(Bytes::from(envelope.encoded_2718()))
    }

    async fn next_nonce(&self) -> Result<u64> {
        self.nonces.next_nonce(self.address()).await
    }

    async fn reset_nonce(&self) {
        self.nonces.reset(self.address()).await;
    }
}
