//! Nonce allocation
//!
//! Thread-safe monotonic transaction-sequence numbers per account,
//! resynchronized against chain state on every issue. A reset clears the
//! in-memory counter so an abandoned transaction never burns a nonce slot.

use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::chain::ChainClient;
use crate::error::{Error, Result};

/// Per-account monotonic nonce issuer
pub struct NonceAllocator {
    chain: Arc<dyn ChainClient>,
    slots: DashMap<Address, Arc<Mutex<Option<u64>>>>,
}

impl NonceAllocator {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, account: Address) -> Arc<Mutex<Option<u64>>> {
        self.slots
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Issue the next nonce for an account.
    ///
    /// Takes the maximum of the chain's pending transaction count and the
    /// in-memory counter, so nonces stay strictly increasing even when the
    /// node lags behind locally queued transactions. A chain query failure
    /// propagates; a stale nonce is never returned.
    pub async fn next_nonce(&self, account: Address) -> Result<u64> {
        let slot = self.slot(account);
        let mut cursor = slot.lock().await;

        let chain_count = self
            .chain
            .transaction_count(account)
            .await
            .map_err(|e| Error::NonceFetch {
                account: format!("{:#x}", account),
                reason: e.to_string(),
            })?;

        let next = cursor.map_or(chain_count, |c| c.max(chain_count));
        *cursor = Some(next + 1);

        debug!("Issued nonce {} for {} (chain count {})", next, account, chain_count);
        Ok(next)
    }

    /// Forget the in-memory counter so the next issue resynchronizes from
    /// chain truth. Called whenever a built transaction is abandoned before
    /// submission.
    pub async fn reset(&self, account: Address) {
        let slot = self.slot(account);
        *slot.lock().await = None;
        warn!("Nonce counter reset for {}", account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use std::sync::atomic::Ordering;

    fn account() -> Address {
        Address::repeat_byte(0x11)
    }

    #[tokio::test]
    async fn test_sequential_issue() {
        let chain = Arc::new(MockChain::default());
        chain.tx_count.store(5, Ordering::SeqCst);
        let allocator = NonceAllocator::new(chain);

        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 5);
        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 6);
        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_chain_ahead_of_cursor() {
        let chain = Arc::new(MockChain::default());
        chain.tx_count.store(5, Ordering::SeqCst);
        let allocator = NonceAllocator::new(Arc::clone(&chain) as Arc<dyn ChainClient>);

        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 5);

        // Another process landed transactions; chain count jumped ahead
        chain.tx_count.store(20, Ordering::SeqCst);
        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 20);
        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 21);
    }

    #[tokio::test]
    async fn test_reset_resynchronizes() {
        let chain = Arc::new(MockChain::default());
        chain.tx_count.store(5, Ordering::SeqCst);
        let allocator = NonceAllocator::new(Arc::clone(&chain) as Arc<dyn ChainClient>);

        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 5);
        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 6);

        // Both built transactions were abandoned; resync from chain truth
        allocator.reset(account()).await;
        assert_eq!(allocator.next_nonce(account()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_chain_failure_propagates() {
        let chain = Arc::new(MockChain::default());
        chain.fail_tx_count.store(true, Ordering::SeqCst);
        let allocator = NonceAllocator::new(chain);

        assert!(matches!(
            allocator.next_nonce(account()).await,
            Err(Error::NonceFetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_issue_distinct_and_gapless() {
        let chain = Arc::new(MockChain::default());
        chain.tx_count.store(0, Ordering::SeqCst);
        let allocator = Arc::new(NonceAllocator::new(Arc::clone(&chain) as Arc<dyn ChainClient>));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move {
                allocator.next_nonce(account()).await.unwrap()
            }));
        }

        let mut nonces: Vec<u64> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        nonces.sort_unstable();

        // 16 distinct, strictly increasing, no gaps
        assert_eq!(nonces, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_accounts_do_not_contend() {
        let chain = Arc::new(MockChain::default());
        let allocator = NonceAllocator::new(chain);

        let a = Address::repeat_byte(0x01);
        let b = Address::repeat_byte(0x02);

        assert_eq!(allocator.next_nonce(a).await.unwrap(), 0);
        assert_eq!(allocator.next_nonce(b).await.unwrap(), 0);
        assert_eq!(allocator.next_nonce(a).await.unwrap(), 1);
    }
}
