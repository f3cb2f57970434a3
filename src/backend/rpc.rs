//! Concrete `Backend` implementation over an EVM-compatible JSON-RPC endpoint.
//!
//! Grounded in the teacher's `Eip155ChainProvider` (`crates/chains/x402-chain-eip155/
//! src/chain/provider.rs`, kept read-only under `examples/`): `ProviderBuilder` over
//! an HTTP transport, plus a raw `RpcClient` for the one non-standard method
//! (`GetPublicKey`, specific to this backend's confidential-execution RPC surface).
//! Wallet-owner signing lives entirely in [`crate::wallet::owner`] — per spec §9,
//! the backend never holds a private key.

use std::str::FromStr;

use alloy_network::Ethereum;
use alloy_primitives::{Address, Bytes};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{Filter, TransactionRequest};
use alloy_transport::TransportError;
use tokio::sync::mpsc;

use super::{
    Backend, BackendError, CallMsg, Log, LogFilter, PublicKeyInfo, SendTransactionResult,
    TransactionReceipt, TransactionStatus,
};

fn parse_address(address: &str) -> Result<Address, BackendError> {
    Address::from_str(address).map_err(|e| BackendError::Other(format!("invalid address: {e}")))
}

impl From<TransportError> for BackendError {
    fn from(err: TransportError) -> Self {
        let message = err.to_string();
        if message.contains("exceeds balance") || message.contains("insufficient funds") {
            BackendError::ExceedsBalance
        } else if message.contains("exceeds block gas limit") {
            BackendError::ExceedsBlockLimit
        } else if message.contains("nonce too low") || message.contains("invalid nonce") {
            BackendError::InvalidNonce
        } else {
            BackendError::Other(message)
        }
    }
}

/// An EVM JSON-RPC backed `Backend`. `rpc` carries the raw client for
/// non-standard methods; `provider` is the standard `eth_*` surface built on the
/// same transport.
pub struct AlloyBackend {
    provider: RootProvider<Ethereum>,
    rpc: RpcClient,
    event_channel_capacity: usize,
}

impl AlloyBackend {
    pub fn connect(rpc_url: url::Url, event_channel_capacity: usize) -> Self {
        let rpc = RpcClient::new_http(rpc_url.clone());
        let provider = ProviderBuilder::new().connect_http(rpc_url);
        AlloyBackend {
            provider,
            rpc,
            event_channel_capacity,
        }
    }

    /// Fetches the connected chain's id, used to build EIP-155-replay-protected
    /// transactions in [`crate::wallet::owner`].
    pub async fn chain_id(&self) -> Result<u64, BackendError> {
        self.provider.get_chain_id().await.map_err(BackendError::from)
    }
}

impl Backend for AlloyBackend {
    async fn get_public_key(&self, address: &str) -> Result<PublicKeyInfo, BackendError> {
        let addr = parse_address(address)?;
        #[derive(serde::Deserialize)]
        struct Raw {
            address: String,
            #[serde(rename = "publicKey")]
            public_key: String,
            timestamp: u64,
            signature: String,
        }
        let raw: Raw = self
            .rpc
            .request("eth_getPublicKey", (addr,))
            .await
            .map_err(BackendError::from)?;
        Ok(PublicKeyInfo {
            address: raw.address,
            public_key: raw.public_key,
            timestamp: raw.timestamp,
            signature: raw.signature,
        })
    }

    async fn nonce_at(&self, address: &str) -> Result<u64, BackendError> {
        let addr = parse_address(address)?;
        self.provider
            .get_transaction_count(addr)
            .await
            .map_err(BackendError::from)
    }

    async fn balance_at(&self, address: &str) -> Result<u128, BackendError> {
        let addr = parse_address(address)?;
        let balance = self
            .provider
            .get_balance(addr)
            .await
            .map_err(BackendError::from)?;
        Ok(balance.to::<u128>())
    }

    async fn estimate_gas(&self, call: &CallMsg) -> Result<u64, BackendError> {
        let mut tx = TransactionRequest::default().from(parse_address(&call.from)?);
        if !call.to.is_empty() {
            tx = tx.to(parse_address(&call.to)?);
        }
        tx = tx.input(Bytes::copy_from_slice(&call.data).into());
        self.provider
            .estimate_gas(tx)
            .await
            .map_err(BackendError::from)
    }

    async fn send_transaction(
        &self,
        signed_tx: &[u8],
    ) -> Result<SendTransactionResult, BackendError> {
        let pending = self
            .provider
            .send_raw_transaction(signed_tx)
            .await
            .map_err(BackendError::from)?;
        let hash = format!("{:#x}", pending.tx_hash());
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        let status = if receipt.status() {
            TransactionStatus::Ok
        } else {
            TransactionStatus::Failed
        };
        Ok(SendTransactionResult {
            status,
            output: Vec::new(),
            hash,
        })
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<TransactionReceipt, BackendError> {
        let hash = hash
            .parse()
            .map_err(|e| BackendError::Other(format!("invalid tx hash: {e}")))?;
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(BackendError::from)?
            .ok_or_else(|| BackendError::Other("receipt not found".to_string()))?;
        Ok(TransactionReceipt {
            contract_address: receipt.contract_address.map(|a| format!("{a:#x}")),
            gas_used: receipt.gas_used,
            status: if receipt.status() {
                TransactionStatus::Ok
            } else {
                TransactionStatus::Failed
            },
        })
    }

    async fn get_code(&self, address: &str) -> Result<String, BackendError> {
        let addr = parse_address(address)?;
        let code = self
            .provider
            .get_code_at(addr)
            .await
            .map_err(BackendError::from)?;
        Ok(format!("0x{}", hex::encode(code)))
    }

    /// Polls `eth_getLogs` on an interval rather than relying on a WebSocket
    /// subscription (the dial/reconnect mechanics of the real transport are out of
    /// scope per spec §1); the retry-on-transient-failure shape mirrors
    /// `fetch_logs_with_retries` in `keeper-rs/src/scanner.rs`.
    async fn subscribe_filter_logs(
        &self,
        filter: LogFilter,
    ) -> Result<mpsc::Receiver<Log>, BackendError> {
        let mut f = Filter::new();
        if !filter.address.is_empty() {
            f = f.address(parse_address(&filter.address)?);
        }
        for topic in &filter.topics {
            let bytes = hex::decode(topic.trim_start_matches("0x"))
                .map_err(|e| BackendError::Other(format!("invalid topic: {e}")))?;
            f = f.event_signature(alloy_primitives::B256::from_slice(&bytes));
        }
        let mut from_block = self.provider.get_block_number().await.map_err(BackendError::from)?;

        let provider = self.provider.clone();
        let (tx, rx) = mpsc::channel(self.event_channel_capacity);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(4));
            loop {
                tick.tick().await;
                let scoped = f.clone().from_block(from_block);
                let logs = match provider.get_logs(&scoped).await {
                    Ok(logs) => logs,
                    Err(err) => {
                        tracing::warn!(error = %err, "log poll failed, retrying next tick");
                        continue;
                    }
                };
                for log in &logs {
                    let data = log.data().data.to_vec();
                    let topics = log
                        .topics()
                        .iter()
                        .map(|t| t.as_slice().to_vec())
                        .collect();
                    if tx.send(Log { data, topics }).await.is_err() {
                        return;
                    }
                }
                if let Some(last) = logs.iter().filter_map(|l| l.block_number).max() {
                    from_block = last + 1;
                }
            }
        });
        Ok(rx)
    }
}
