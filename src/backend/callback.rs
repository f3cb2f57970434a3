//! The callback capability set (spec §6): notifications the wallet owner emits
//! about its own lifecycle. Emission failures are swallowed per spec §7 ("Balance
//! refresh, callback emission, and logging failures are swallowed").

use std::future::Future;

/// AAD: associated-authenticated-data, an opaque identifier forwarded from the
/// issuing caller for their own bookkeeping (glossary).
pub type Aad = String;

pub trait Callback: Send + Sync + 'static {
    fn transaction_committed(
        &self,
        aad: Aad,
        address: &str,
        hash: &str,
    ) -> impl Future<Output = ()> + Send;

    fn wallet_out_of_funds(&self, address: &str) -> impl Future<Output = ()> + Send;

    fn wallet_reached_funds_threshold(
        &self,
        address: &str,
        before: u128,
        after: u128,
    ) -> impl Future<Output = ()> + Send;
}

/// Default callback sink: logs at the same granularity the rest of the core does,
/// emits nothing externally. Used when no HTTP callback client is configured.
pub struct LoggingCallback;

impl Callback for LoggingCallback {
    async fn transaction_committed(&self, aad: Aad, address: &str, hash: &str) {
        tracing::info!(aad = %aad, address = %address, hash = %hash, "transaction committed");
    }

    async fn wallet_out_of_funds(&self, address: &str) {
        tracing::warn!(address = %address, "wallet out of funds");
    }

    async fn wallet_reached_funds_threshold(&self, address: &str, before: u128, after: u128) {
        tracing::warn!(address = %address, before, after, "wallet reached funds threshold");
    }
}
