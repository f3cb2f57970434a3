//! Wallet owner actor (component D): a single-writer over one private key.
//!
//! Nonce allocation, signing and submission are all serialized through this
//! actor's `handle` loop (spec §4.D, §9 "Ownership of private keys") — no other
//! component ever touches the signer.

use std::str::FromStr;
use std::sync::Arc;

use alloy_network::eip2718::Encodable2718;
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, Bytes};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;

use crate::actor::WorkerActor;
use crate::backend::{
    Backend, BackendError, CallMsg, TransactionStatus, BLOCK_GAS_LIMIT_SENTINEL,
    ENCRYPTED_CALL_GAS_FALLBACK,
};
use crate::backend::callback::Callback;

#[derive(Debug, Clone)]
pub enum WalletRequest {
    /// Signs an arbitrary call at the owner's next nonce without submitting it.
    /// Used internally by the retry loop to re-sign after a nonce resync, and
    /// exposed as a first-class message per spec §4.D's three message kinds.
    Sign { to: String, data: Vec<u8> },
    Stats,
    Execute {
        aad: String,
        id: u64,
        address: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct WalletStats {
    pub address: String,
    pub current_balance: u128,
    pub start_balance: u128,
    pub consumed_balance: u128,
}

#[derive(Debug, Clone)]
pub enum WalletReply {
    Signed(Vec<u8>),
    Stats(WalletStats),
    /// `address` is the target (calls) or the newly deployed contract (creation);
    /// `output` is the hex-encoded execution output.
    Executed { address: String, output: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletError {
    #[error("failed to sign transaction: {0}")]
    SignedTx(String),
    #[error("send transaction failed: {0}")]
    SendTransaction(#[source] BackendError),
    #[error("gas estimation failed: {0}")]
    EstimateGas(#[source] BackendError),
    #[error("failed to fetch transaction receipt: {0}")]
    TransactionReceipt(#[source] BackendError),
    #[error("failed to fetch nonce: {0}")]
    FetchNonce(#[source] BackendError),
    #[error("failed to fetch balance: {0}")]
    GetBalance(#[source] BackendError),
    #[error("failed to fetch deployed code: {0}")]
    GetServiceCode(#[source] BackendError),
    #[error("contract creation produced no code")]
    ServiceCodeNotDeployed,
    #[error("transaction exceeds wallet balance")]
    ExceedsBalance,
    #[error("transaction exceeds block gas limit")]
    ExceedsBlockLimit,
    #[error("retry budget exhausted")]
    MaxAttemptsReached,
    #[error("internal wallet error: {0}")]
    Internal(String),
}

pub struct WalletOwner<B: Backend, C: Callback> {
    address: Address,
    signer: PrivateKeySigner,
    chain_id: u64,
    next_nonce: u64,
    current_balance: u128,
    start_balance: u128,
    consumed_balance: u128,
    backend: Arc<B>,
    callback: Arc<C>,
    retry_max_attempts_default: u32,
    retry_max_attempts_nonce: u32,
}

impl<B: Backend, C: Callback> WalletOwner<B, C> {
    /// Fetches `NonceAt`/`BalanceAt` once; either failing fails construction
    /// (spec §4.D "Initialization must fetch NonceAt and BalanceAt once").
    pub async fn new(
        signer: PrivateKeySigner,
        chain_id: u64,
        backend: Arc<B>,
        callback: Arc<C>,
        retry_max_attempts_default: u32,
        retry_max_attempts_nonce: u32,
    ) -> Result<Self, WalletError> {
        let address = signer.address();
        let addr_str = format!("{address:#x}");
        let next_nonce = backend
            .nonce_at(&addr_str)
            .await
            .map_err(WalletError::FetchNonce)?;
        let balance = backend
            .balance_at(&addr_str)
            .await
            .map_err(WalletError::GetBalance)?;
        Ok(WalletOwner {
            address,
            signer,
            chain_id,
            next_nonce,
            current_balance: balance,
            start_balance: balance,
            consumed_balance: 0,
            backend,
            callback,
            retry_max_attempts_default,
            retry_max_attempts_nonce,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn address_str(&self) -> String {
        format!("{:#x}", self.address)
    }

    fn stats(&self) -> WalletStats {
        WalletStats {
            address: self.address_str(),
            current_balance: self.current_balance,
            start_balance: self.start_balance,
            consumed_balance: self.consumed_balance,
        }
    }

    async fn sign(&self, to: &str, data: &[u8], nonce: u64, gas: u64) -> Result<Vec<u8>, WalletError> {
        let mut tx = TransactionRequest::default()
            .from(self.address)
            .nonce(nonce)
            .with_chain_id(self.chain_id)
            .gas_limit(gas)
            .input(Bytes::copy_from_slice(data).into());
        if !to.is_empty() {
            let addr =
                Address::from_str(to).map_err(|e| WalletError::Internal(format!("invalid address: {e}")))?;
            tx = tx.to(addr);
        }
        let wallet = EthereumWallet::from(self.signer.clone());
        let envelope = tx
            .build(&wallet)
            .await
            .map_err(|e| WalletError::SignedTx(e.to_string()))?;
        Ok(envelope.encoded_2718())
    }

    /// Implements spec §4.D's `Execute` algorithm.
    async fn execute(
        &mut self,
        aad: &str,
        address: &str,
        data: &[u8],
    ) -> Result<(String, String), WalletError> {
        let is_creation = address.is_empty();
        let gas = if is_creation {
            let call = CallMsg {
                from: self.address_str(),
                to: String::new(),
                data: data.to_vec(),
            };
            let estimated = self
                .backend
                .estimate_gas(&call)
                .await
                .map_err(WalletError::EstimateGas)?;
            if estimated == BLOCK_GAS_LIMIT_SENTINEL {
                return Err(WalletError::EstimateGas(BackendError::Other(
                    "backend returned the block gas limit sentinel".to_string(),
                )));
            }
            estimated
        } else {
            // Encrypted call payloads defeat estimation; spec §9 allows a fixed
            // fallback here instead of calling EstimateGas.
            ENCRYPTED_CALL_GAS_FALLBACK
        };

        let mut nonce = self.next_nonce;
        let mut attempts = 0u32;
        let mut nonce_resyncs = 0u32;

        loop {
            let signed = self.sign(address, data, nonce, gas).await?;
            match self.backend.send_transaction(&signed).await {
                Ok(sent) => {
                    self.next_nonce = nonce + 1;

                    if let Ok(balance) = self.backend.balance_at(&self.address_str()).await {
                        let before = self.current_balance;
                        self.current_balance = balance;
                        if balance < before {
                            self.callback
                                .wallet_reached_funds_threshold(&self.address_str(), before, balance)
                                .await;
                        }
                    }
                    self.callback
                        .transaction_committed(aad.to_string(), address, &sent.hash)
                        .await;

                    let receipt = self
                        .backend
                        .transaction_receipt(&sent.hash)
                        .await
                        .map_err(WalletError::TransactionReceipt)?;
                    if receipt.status != TransactionStatus::Ok {
                        return Err(WalletError::Internal(format!(
                            "transaction {} failed, output: 0x{}",
                            sent.hash,
                            hex::encode(&sent.output)
                        )));
                    }
                    self.consumed_balance += receipt.gas_used as u128;

                    if is_creation {
                        let contract_address = receipt.contract_address.ok_or_else(|| {
                            WalletError::Internal("receipt missing contract address".to_string())
                        })?;
                        let code = self
                            .backend
                            .get_code(&contract_address)
                            .await
                            .map_err(WalletError::GetServiceCode)?;
                        if code.len() <= 2 {
                            return Err(WalletError::ServiceCodeNotDeployed);
                        }
                        return Ok((contract_address, String::new()));
                    }
                    return Ok((address.to_string(), format!("0x{}", hex::encode(&sent.output))));
                }
                Err(BackendError::ExceedsBalance) => {
                    self.callback.wallet_out_of_funds(&self.address_str()).await;
                    return Err(WalletError::ExceedsBalance);
                }
                Err(BackendError::ExceedsBlockLimit) => {
                    return Err(WalletError::ExceedsBlockLimit);
                }
                Err(BackendError::InvalidNonce) => {
                    nonce_resyncs += 1;
                    if nonce_resyncs > self.retry_max_attempts_nonce {
                        return Err(WalletError::MaxAttemptsReached);
                    }
                    nonce = self
                        .backend
                        .nonce_at(&self.address_str())
                        .await
                        .map_err(WalletError::FetchNonce)?;
                    self.next_nonce = nonce;
                    continue;
                }
                Err(BackendError::Other(message)) => {
                    attempts += 1;
                    if attempts >= self.retry_max_attempts_default {
                        return Err(WalletError::SendTransaction(BackendError::Other(message)));
                    }
                    continue;
                }
            }
        }
    }
}

impl<B: Backend, C: Callback> WorkerActor for WalletOwner<B, C> {
    type Request = WalletRequest;
    type Reply = WalletReply;
    type Error = WalletError;

    async fn handle(&mut self, request: WalletRequest) -> Result<WalletReply, WalletError> {
        match request {
            WalletRequest::Stats => Ok(WalletReply::Stats(self.stats())),
            WalletRequest::Sign { to, data } => {
                let nonce = self.next_nonce;
                let signed = self.sign(&to, &data, nonce, ENCRYPTED_CALL_GAS_FALLBACK).await?;
                Ok(WalletReply::Signed(signed))
            }
            WalletRequest::Execute {
                aad,
                id: _,
                address,
                data,
            } => {
                let (address, output) = self.execute(&aad, &address, &data).await?;
                Ok(WalletReply::Executed { address, output })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use tokio::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::backend::{Log, LogFilter, PublicKeyInfo, SendTransactionResult, TransactionReceipt};

    struct FakeBackend {
        nonce: AtomicU64,
        balance: AtomicU64,
        fail_with_invalid_nonce_times: AtomicU32,
        always_fail: bool,
        sends: Mutex<Vec<u64>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            FakeBackend {
                nonce: AtomicU64::new(0),
                balance: AtomicU64::new(1_000_000),
                fail_with_invalid_nonce_times: AtomicU32::new(0),
                always_fail: false,
                sends: Mutex::new(Vec::new()),
            }
        }
    }

    impl Backend for FakeBackend {
        async fn get_public_key(&self, address: &str) -> Result<PublicKeyInfo, BackendError> {
            Ok(PublicKeyInfo {
                address: address.to_string(),
                public_key: "0x00".into(),
                timestamp: 0,
                signature: "0x00".into(),
            })
        }

        async fn nonce_at(&self, _address: &str) -> Result<u64, BackendError> {
            Ok(self.nonce.load(Ordering::SeqCst))
        }

        async fn balance_at(&self, _address: &str) -> Result<u128, BackendError> {
            Ok(self.balance.load(Ordering::SeqCst) as u128)
        }

        async fn estimate_gas(&self, _call: &CallMsg) -> Result<u64, BackendError> {
            Ok(21_000)
        }

        async fn send_transaction(
            &self,
            signed_tx: &[u8],
        ) -> Result<SendTransactionResult, BackendError> {
            if self.always_fail {
                return Err(BackendError::Other("always fails".into()));
            }
            if self.fail_with_invalid_nonce_times.load(Ordering::SeqCst) > 0 {
                self.fail_with_invalid_nonce_times.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::InvalidNonce);
            }
            let nonce_used = self.nonce.fetch_add(1, Ordering::SeqCst);
            self.sends.lock().await.push(nonce_used);
            Ok(SendTransactionResult {
                status: TransactionStatus::Ok,
                output: b"ok".to_vec(),
                hash: format!("0x{}", hex::encode(signed_tx.len().to_be_bytes())),
            })
        }

        async fn transaction_receipt(&self, _hash: &str) -> Result<TransactionReceipt, BackendError> {
            Ok(TransactionReceipt {
                contract_address: Some("0x1111111111111111111111111111111111111111".into()),
                gas_used: 21_000,
                status: TransactionStatus::Ok,
            })
        }

        async fn get_code(&self, _address: &str) -> Result<String, BackendError> {
            Ok("0x6001".into())
        }

        async fn subscribe_filter_logs(
            &self,
            _filter: LogFilter,
        ) -> Result<mpsc::Receiver<Log>, BackendError> {
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

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::from_str(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn execute_against_healthy_backend_allocates_nonce_and_returns_output() {
        let backend = Arc::new(FakeBackend::new());
        let mut owner = WalletOwner::new(signer(), 1, backend, Arc::new(NoopCallback), 2, 10)
            .await
            .unwrap();
        let (address, output) = owner
            .execute("aad-1", "0x0000000000000000000000000000000000000000", b"\x00")
            .await
            .unwrap();
        assert_eq!(address, "0x0000000000000000000000000000000000000000");
        assert_eq!(output, "0x6f6b");
    }

    #[tokio::test]
    async fn invalid_nonce_resyncs_and_retries_within_budget() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_with_invalid_nonce_times.store(1, Ordering::SeqCst);
        backend.nonce.store(5, Ordering::SeqCst);
        let mut owner = WalletOwner::new(signer(), 1, Arc::clone(&backend), Arc::new(NoopCallback), 2, 10)
            .await
            .unwrap();
        let result = owner
            .execute("aad-2", "0x0000000000000000000000000000000000000001", b"\x01")
            .await;
        assert!(result.is_ok());
        assert_eq!(*backend.sends.lock().await, vec![5]);
    }

    #[tokio::test]
    async fn contract_creation_with_undeployed_code_is_reported() {
        struct NoCodeBackend(FakeBackend);
        impl Backend for NoCodeBackend {
            async fn get_public_key(&self, a: &str) -> Result<PublicKeyInfo, BackendError> {
                self.0.get_public_key(a).await
            }
            async fn nonce_at(&self, a: &str) -> Result<u64, BackendError> {
                self.0.nonce_at(a).await
            }
            async fn balance_at(&self, a: &str) -> Result<u128, BackendError> {
                self.0.balance_at(a).await
            }
            async fn estimate_gas(&self, c: &CallMsg) -> Result<u64, BackendError> {
                self.0.estimate_gas(c).await
            }
            async fn send_transaction(&self, s: &[u8]) -> Result<SendTransactionResult, BackendError> {
                self.0.send_transaction(s).await
            }
            async fn transaction_receipt(&self, h: &str) -> Result<TransactionReceipt, BackendError> {
                self.0.transaction_receipt(h).await
            }
            async fn get_code(&self, _address: &str) -> Result<String, BackendError> {
                Ok("0x".into())
            }
            async fn subscribe_filter_logs(&self, f: LogFilter) -> Result<mpsc::Receiver<Log>, BackendError> {
                self.0.subscribe_filter_logs(f).await
            }
        }

        let backend = Arc::new(NoCodeBackend(FakeBackend::new()));
        let mut owner = WalletOwner::new(signer(), 1, backend, Arc::new(NoopCallback), 2, 10)
            .await
            .unwrap();
        let err = owner.execute("aad-3", "", b"\x60\x60").await.unwrap_err();
        assert!(matches!(err, WalletError::ServiceCodeNotDeployed));
    }
}
