//! Transaction signing and submission.
//!
//! The target chain has stable gas, so every transaction is legacy
//! (type 0) with the configured fixed `gas_price` and `gas_limit`. The
//! wallet nonce is a single resource: [`TxSender::send`] holds an
//! exclusive lock for the whole submit-and-confirm window, so at most one
//! transaction is ever in flight.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::KeeperError;

/// How long to wait for a receipt before the single retry.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll cadence while retrying the receipt fetch.
const RECEIPT_POLL: Duration = Duration::from_secs(2);

/// Locally cached wallet nonce. Safe because the send lock serializes all
/// submissions.
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial: u64) -> Self {
        Self {
            current: AtomicU64::new(initial),
        }
    }

    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Force the counter back to the chain's view. Used after a failed
    /// submission, where the local increment never landed.
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxOutcome {
    pub hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Signer plus submission path.
pub struct TxSender {
    rpc_url: String,
    wallet: EthereumWallet,
    /// Keeper address; receives auction proceeds and liquidation rewards.
    pub address: Address,
    chain_id: u64,
    gas_limit: u64,
    gas_price: u128,
    nonce: NonceManager,
    send_lock: Mutex<()>,
}

impl TxSender {
    /// Parse the key, fetch the initial nonce, and fix the gas policy.
    /// `gas_price` is capped at `max_gas_price` once here; it never moves
    /// afterwards.
    pub async fn new(
        private_key: &str,
        rpc_url: &str,
        chain_id: u64,
        gas_limit: u64,
        gas_price: u128,
        max_gas_price: u128,
    ) -> Result<Self, KeeperError> {
        let key = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| KeeperError::Config(format!("invalid private key: {e}")))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().on_http(
            rpc_url
                .parse()
                .map_err(|e| KeeperError::Config(format!("invalid rpc url: {e}")))?,
        );
        let initial_nonce = provider
            .get_transaction_count(address)
            .await
            .map_err(|e| KeeperError::ChainRpc(format!("initial nonce: {e}")))?;

        let gas_price = gas_price.min(max_gas_price);
        info!(
            address = %address,
            chain_id,
            initial_nonce,
            gas_limit,
            gas_price_gwei = gas_price / 1_000_000_000,
            "Transaction sender initialized"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
            chain_id,
            gas_limit,
            gas_price,
            nonce: NonceManager::new(initial_nonce),
            send_lock: Mutex::new(()),
        })
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce.current()
    }

    pub fn gas_price(&self) -> u128 {
        self.gas_price
    }

    /// Sign and submit a legacy transaction, then wait for the receipt.
    ///
    /// Receipt timeout is retried exactly once by hash polling; a second
    /// miss surfaces as `TxUnknown`. A mined-but-reverted transaction is
    /// `TxReverted` and is not retried.
    pub async fn send(&self, to: Address, calldata: Bytes) -> Result<TxOutcome, KeeperError> {
        let _guard = self.send_lock.lock().await;

        let nonce = self.nonce.next();
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata)
            .with_nonce(nonce)
            .with_gas_limit(self.gas_limit)
            .with_gas_price(self.gas_price)
            .with_chain_id(self.chain_id);

        debug!(to = %to, nonce, "Submitting legacy transaction");

        let provider = ProviderBuilder::new().wallet(self.wallet.clone()).on_http(
            self.rpc_url
                .parse()
                .map_err(|e| KeeperError::ChainRpc(format!("bad rpc url: {e}")))?,
        );

        let pending = match provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) => {
                // Nothing reached the chain; roll the local nonce back.
                self.sync_nonce(&provider).await;
                return Err(classify_send_error(e.to_string()));
            }
        };
        let hash = *pending.tx_hash();
        info!(tx_hash = %hash, nonce, "Transaction submitted, awaiting receipt");

        let receipt = match tokio::time::timeout(RECEIPT_TIMEOUT, pending.get_receipt()).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                warn!(tx_hash = %hash, error = %e, "Receipt stream failed, polling by hash");
                self.poll_receipt(&provider, hash).await?
            }
            Err(_) => {
                warn!(tx_hash = %hash, "Receipt wait timed out, retrying once");
                self.poll_receipt(&provider, hash).await?
            }
        };

        let outcome = TxOutcome {
            hash,
            block_number: receipt.block_number.unwrap_or(0),
            gas_used: receipt.gas_used.try_into().unwrap_or(u64::MAX),
        };

        if receipt.status() {
            info!(
                tx_hash = %hash,
                block = outcome.block_number,
                gas_used = outcome.gas_used,
                "Transaction confirmed"
            );
            Ok(outcome)
        } else {
            warn!(tx_hash = %hash, block = outcome.block_number, "Transaction reverted");
            Err(KeeperError::TxReverted { hash, reason: None })
        }
    }

    /// Single bounded retry after a receipt timeout.
    async fn poll_receipt<P: Provider>(
        &self,
        provider: &P,
        hash: B256,
    ) -> Result<alloy::rpc::types::TransactionReceipt, KeeperError> {
        let deadline = tokio::time::Instant::now() + RECEIPT_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            match provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => debug!(tx_hash = %hash, error = %e, "Receipt poll failed"),
            }
            tokio::time::sleep(RECEIPT_POLL).await;
        }
        Err(KeeperError::TxUnknown { hash })
    }

    async fn sync_nonce<P: Provider>(&self, provider: &P) {
        match provider.get_transaction_count(self.address).await {
            Ok(chain_nonce) => {
                self.nonce.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce from chain");
            }
        }
    }
}

/// Map a node rejection message to the error taxonomy.
fn classify_send_error(message: String) -> KeeperError {
    let lower = message.to_lowercase();
    if lower.contains("underpriced") {
        KeeperError::TxUnderpriced(message)
    } else if lower.contains("revert") {
        KeeperError::TxReverted {
            hash: B256::ZERO,
            reason: Some(message),
        }
    } else {
        KeeperError::ChainRpc(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_manager_counts_and_resets() {
        let manager = NonceManager::new(10);
        assert_eq!(manager.current(), 10);
        assert_eq!(manager.next(), 10);
        assert_eq!(manager.next(), 11);
        assert_eq!(manager.current(), 12);

        manager.reset(5);
        assert_eq!(manager.current(), 5);
    }

    #[test]
    fn send_errors_classify_by_message() {
        assert_eq!(
            classify_send_error("replacement transaction underpriced".into()).kind(),
            "tx_underpriced"
        );
        assert_eq!(
            classify_send_error("execution reverted: Dog/liquidation-limit-hit".into()).kind(),
            "tx_reverted"
        );
        assert_eq!(
            classify_send_error("connection refused".into()).kind(),
            "chain_rpc"
        );
    }

    #[tokio::test]
    #[ignore] // Requires a local node
    async fn sender_initializes_against_node() {
        // Well-known anvil test key, never funded on a live chain.
        let private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let sender = TxSender::new(
            private_key,
            "http://127.0.0.1:8545",
            31337,
            1_000_000,
            1_000_000_000,
            10_000_000_000,
        )
        .await
        .unwrap();
        assert_eq!(
            format!("{:?}", sender.address).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }
}
