//! The backend RPC capability set (spec §6): the only contract the core depends on
//! for the underlying blockchain. The wire-level mechanics (dial/reconnect, pooling)
//! are explicitly out of scope; this trait is the black box boundary.

pub mod callback;
pub mod rpc;

use std::future::Future;

use tokio::sync::mpsc;

/// Sentinel gas value the backend returns on estimation failure for contract
/// creation; must be treated as an error rather than a usable gas limit (spec §4.D,
/// §9).
pub const BLOCK_GAS_LIMIT_SENTINEL: u64 = 2_251_799_813_685_248;

/// Gas value substituted for calls with a non-empty target address, where
/// estimation may be unreliable against encrypted payloads (spec §9).
pub const ENCRYPTED_CALL_GAS_FALLBACK: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CallMsg {
    pub from: String,
    /// Empty for contract creation.
    pub to: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SendTransactionResult {
    pub status: TransactionStatus,
    pub output: Vec<u8>,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    pub contract_address: Option<String>,
    pub gas_used: u64,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyInfo {
    pub address: String,
    pub public_key: String,
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<String>,
}

/// A single backend log event, pre-hex-encoding. The subscription manager (§4.F)
/// turns this into a [`crate::events::DataEvent`].
#[derive(Debug, Clone)]
pub struct Log {
    pub data: Vec<u8>,
    pub topics: Vec<Vec<u8>>,
}

/// Errors distinguished by the backend contract (spec §6, §4.D). `Other` carries
/// everything else and is surfaced as `InternalError` by the core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("transaction exceeds wallet balance")]
    ExceedsBalance,
    #[error("transaction exceeds block gas limit")]
    ExceedsBlockLimit,
    #[error("invalid nonce")]
    InvalidNonce,
    #[error("backend error: {0}")]
    Other(String),
}

/// The blockchain RPC collaborator (spec §6). Assumed safe for concurrent calls;
/// pooling/reconnect are the implementation's concern, not the core's.
pub trait Backend: Send + Sync + 'static {
    fn get_public_key(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<PublicKeyInfo, BackendError>> + Send;

    fn nonce_at(&self, address: &str) -> impl Future<Output = Result<u64, BackendError>> + Send;

    fn balance_at(&self, address: &str) -> impl Future<Output = Result<u128, BackendError>> + Send;

    fn estimate_gas(&self, call: &CallMsg) -> impl Future<Output = Result<u64, BackendError>> + Send;

    fn send_transaction(
        &self,
        signed_tx: &[u8],
    ) -> impl Future<Output = Result<SendTransactionResult, BackendError>> + Send;

    fn transaction_receipt(
        &self,
        hash: &str,
    ) -> impl Future<Output = Result<TransactionReceipt, BackendError>> + Send;

    fn get_code(&self, address: &str) -> impl Future<Output = Result<String, BackendError>> + Send;

    /// Returns a channel fed by the backend for as long as the subscription lives;
    /// the channel closing signals the subscription should tear itself down.
    fn subscribe_filter_logs(
        &self,
        filter: LogFilter,
    ) -> impl Future<Output = Result<mpsc::Receiver<Log>, BackendError>> + Send;
}
