//! Transaction executor (component E): a pool of [`WalletOwner`] actors.
//!
//! `Execute` round-robins across owners via [`Master::execute`] so wallets submit
//! in parallel without any component but the owner itself touching a key (spec
//! §4.E, §9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_signer_local::PrivateKeySigner;
use tokio_util::sync::CancellationToken;

use crate::actor::{Master, MasterWorkerError};
use crate::backend::callback::Callback;
use crate::backend::Backend;
use crate::wallet::owner::{WalletError, WalletOwner, WalletReply, WalletRequest, WalletStats};

type OwnerMaster<B, C> = Master<WalletOwner<B, C>, Box<dyn Fn() -> WalletOwner<B, C> + Send + Sync>>;

/// Errors surfaced by the executor pool, distinct from a single owner's
/// [`WalletError`] so callers can tell "no owner available" apart from "an owner
/// failed."
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("wallet execution failed: {0}")]
    Wallet(#[from] WalletError),
    #[error("no wallet owner available or request was cancelled: {0}")]
    Unavailable(#[source] MasterWorkerError),
}

/// `Execute(req)` load-balances across the configured wallets; `Stats()` reports
/// every wallet's balances keyed by address. The pool never auto-creates or
/// evicts a wallet owner — one is started per configured key at startup and
/// lives for the process's lifetime (spec §3 "A wallet owner is created at
/// startup ... and never inactivity-evicted").
pub struct TransactionExecutor<B: Backend, C: Callback> {
    master: OwnerMaster<B, C>,
}

impl<B: Backend, C: Callback> TransactionExecutor<B, C> {
    /// `signers` is the full, fixed set of configured wallets. Owner
    /// construction requires a live backend (`NonceAt`/`BalanceAt`), so this is
    /// async and fails if any wallet fails to initialize.
    pub async fn new(
        signers: Vec<PrivateKeySigner>,
        chain_id: u64,
        backend: Arc<B>,
        callback: Arc<C>,
        retry_max_attempts_default: u32,
        retry_max_attempts_nonce: u32,
        cancellation: CancellationToken,
    ) -> Result<Self, WalletError> {
        let factory: Box<dyn Fn() -> WalletOwner<B, C> + Send + Sync> =
            Box::new(|| unreachable!("wallet owners are never auto-created on request"));
        let master = Master::new(factory, false, None, cancellation);
        for signer in signers {
            let address = format!("{:#x}", signer.address());
            let owner = WalletOwner::new(
                signer,
                chain_id,
                Arc::clone(&backend),
                Arc::clone(&callback),
                retry_max_attempts_default,
                retry_max_attempts_nonce,
            )
            .await?;
            master
                .create(address, owner)
                .expect("wallet addresses are unique within a configured set");
        }
        Ok(TransactionExecutor { master })
    }

    pub async fn execute(
        &self,
        aad: String,
        id: u64,
        address: String,
        data: Vec<u8>,
    ) -> Result<(String, String), ExecutorError> {
        let reply = self
            .master
            .execute(WalletRequest::Execute {
                aad,
                id,
                address,
                data,
            })
            .await
            .map_err(ExecutorError::Unavailable)?
            .map_err(ExecutorError::Wallet)?;
        match reply {
            WalletReply::Executed { address, output } => Ok((address, output)),
            _ => unreachable!("Execute always replies with Executed"),
        }
    }

    pub async fn stats(&self) -> HashMap<String, WalletStats> {
        let results = self.master.broadcast(WalletRequest::Stats).await;
        let mut out = HashMap::with_capacity(results.len());
        for (key, result) in results {
            if let Ok(Ok(WalletReply::Stats(stats))) = result {
                out.insert(key, stats);
            } else {
                tracing::warn!(wallet = %key, "failed to collect wallet stats");
            }
        }
        out
    }

    pub fn wallet_count(&self) -> usize {
        self.master.len()
    }

    pub fn wallet_addresses(&self) -> Vec<String> {
        self.master.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        CallMsg, BackendError, Log, LogFilter, PublicKeyInfo, SendTransactionResult,
        TransactionReceipt, TransactionStatus,
    };
    use crate::backend::callback::Callback;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::mpsc;

    struct CountingBackend {
        nonces: dashmap::DashMap<String, AtomicU64>,
    }

    impl CountingBackend {
        fn new() -> Self {
            CountingBackend {
                nonces: dashmap::DashMap::new(),
            }
        }
    }

    impl Backend for CountingBackend {
        async fn get_public_key(&self, address: &str) -> Result<PublicKeyInfo, BackendError> {
            Ok(PublicKeyInfo {
                address: address.to_string(),
                public_key: "0x00".into(),
                timestamp: 0,
                signature: "0x00".into(),
            })
        }

        async fn nonce_at(&self, address: &str) -> Result<u64, BackendError> {
            Ok(self
                .nonces
                .entry(address.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .load(Ordering::SeqCst))
        }

        async fn balance_at(&self, _address: &str) -> Result<u128, BackendError> {
            Ok(1_000_000)
        }

        async fn estimate_gas(&self, _call: &CallMsg) -> Result<u64, BackendError> {
            Ok(21_000)
        }

        async fn send_transaction(&self, _signed_tx: &[u8]) -> Result<SendTransactionResult, BackendError> {
            Ok(SendTransactionResult {
                status: TransactionStatus::Ok,
                output: b"ok".to_vec(),
                hash: "0xhash".into(),
            })
        }

        async fn transaction_receipt(&self, _hash: &str) -> Result<TransactionReceipt, BackendError> {
            Ok(TransactionReceipt {
                contract_address: None,
                gas_used: 21_000,
                status: TransactionStatus::Ok,
            })
        }

        async fn get_code(&self, _address: &str) -> Result<String, BackendError> {
            Ok("0x6001".into())
        }

        async fn subscribe_filter_logs(&self, _filter: LogFilter) -> Result<mpsc::Receiver<Log>, BackendError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    struct NoopCallback;
    impl Callback for NoopCallback {
        async fn transaction_committed(&self, _aad: String, _address: &str, _hash: &str) {}
        async fn wallet_out_of_funds(&self, _address: &str) {}
        async fn wallet_reached_funds_threshold(&self, _address: &str, _before: u128, _after: u128) {}
    }

    fn signers(n: usize) -> Vec<PrivateKeySigner> {
        // Distinct well-known test keys (1..=n), never used on a live chain.
        (1..=n as u64)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[31] = i as u8;
                PrivateKeySigner::from_bytes(&bytes.into()).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn execute_round_robins_across_wallets() {
        let backend = Arc::new(CountingBackend::new());
        let executor = TransactionExecutor::new(
            signers(3),
            1,
            backend,
            Arc::new(NoopCallback),
            2,
            10,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(executor.wallet_count(), 3);

        let mut used_addresses = std::collections::HashSet::new();
        for i in 0..6u64 {
            let (address, _output) = executor
                .execute(format!("aad-{i}"), i, "0x0000000000000000000000000000000000000001".into(), b"\x00".to_vec())
                .await
                .unwrap();
            used_addresses.insert(address);
        }
        // every call targets the same contract address; round-robin fairness is
        // the wallet *owner* selected, exercised via `stats()` below.
        assert_eq!(used_addresses.len(), 1);

        let stats = executor.stats().await;
        assert_eq!(stats.len(), 3);
        let total_consumed: u128 = stats.values().map(|s| s.consumed_balance).sum();
        assert_eq!(total_consumed, 6 * 21_000);
    }
}
