//! Managed signing backend
//!
//! Delegates signing to a custody provider behind an authenticated HTTP
//! API: the key never enters this process. Submission happens provider-side
//! for `sign_and_send`; `sign_only` returns the raw signed bytes for local
//! submission.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::ChainClient;
use crate::error::{Error, Result};
use crate::nonce::NonceAllocator;

use super::{erc20_balance, PreparedTransaction, SigningBackend};

/// Signing request sent to the custody API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub to: String,
    /// Value in wei, hex encoded
    pub value: String,
    pub data: String,
    pub gas_limit: u64,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    pub nonce: u64,
    pub chain_id: u64,
    /// true = provider also broadcasts the transaction
    pub broadcast: bool,
}

/// Response from the custody API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    /// Transaction hash (when broadcast)
    pub transaction_hash: Option<String>,
    /// Raw signed transaction (when not broadcast)
    pub signed_payload: Option<String>,
    /// Error message (if failed)
    pub error: Option<String>,
}

/// Signing backend backed by a managed custody API
pub struct ManagedApiSigner {
    http: Client,
    base_url: String,
    api_key: String,
    address: Address,
    chain: Arc<dyn ChainClient>,
    nonces: Arc<NonceAllocator>,
}

impl ManagedApiSigner {
    pub fn new(
        base_url: &str,
        api_key: &str,
        address: Address,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        let nonces = Arc::new(NonceAllocator::new(Arc::clone(&chain)));
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            address,
            chain,
            nonces,
        }
    }

    fn sign_request(tx: &PreparedTransaction, broadcast: bool) -> SignRequest {
        SignRequest {
            to: format!("{:#x}", tx.to),
            value: format!("{:#x}", tx.value),
            data: format!("{}", tx.data),
            gas_limit: tx.gas_limit,
            max_fee_per_gas: tx.max_fee_per_gas.to_string(),
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.to_string(),
            nonce: tx.nonce,
            chain_id: tx.chain_id,
            broadcast,
        }
    }

    async fn post_sign(&self, request: &SignRequest) -> Result<SignResponse> {
        debug!(
            "Custody sign request: to {} nonce {} broadcast {}",
            request.to, request.nonce, request.broadcast
        );

        let response = self
            .http
            .post(format!("{}/v1/transactions/sign", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Signer(format!("custody API unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Signer(format!(
                "custody API returned {}: {}",
                status, body
            )));
        }

        let parsed: SignResponse = response
            .json()
            .await
            .map_err(|e| Error::Signer(format!("bad custody API response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(Error::Signer(format!("custody API error: {}", error)));
        }

        Ok(parsed)
    }
}

#[async_trait]
impl SigningBackend for ManagedApiSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance(&self, token: Option<Address>) -> Result<U256> {
        match token {
            None => self.chain.balance(self.address).await,
            Some(token) => erc20_balance(&self.chain, token, self.address).await,
        }
    }

    async fn sign_and_send(&self, tx: &PreparedTransaction) -> Result<B256> {
        let response = self.post_sign(&Self::sign_request(tx, true)).await?;
        let hash = response
            .transaction_hash
            .ok_or_else(|| Error::Signer("custody API returned no transaction hash".into()))?;
        let hash: B256 = hash
            .parse()
            .map_err(|e| Error::Signer(format!("bad transaction hash {}: {}", hash, e)))?;

        info!("Custody provider submitted {} (nonce {})", hash, tx.nonce);
        Ok(hash)
    }

    async fn sign_only(&self, tx: &PreparedTransaction) -> Result<Bytes> {
        let response = self.post_sign(&Self::sign_request(tx, false)).await?;
        let payload = response
            .signed_payload
            .ok_or_else(|| Error::Signer("custody API returned no signed payload".into()))?;
        payload
            .parse::<Bytes>()
            .map_err(|e| Error::Signer(format!("bad signed payload: {}", e)))
    }

    async fn next_nonce(&self) -> Result<u64> {
        self.nonces.next_nonce(self.address).await
    }

    async fn reset_nonce(&self) {
        self.nonces.reset(self.address).await;
    }
}
