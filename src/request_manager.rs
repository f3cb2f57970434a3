//! Request manager (component G): the public façade the HTTP layer calls.
//!
//! Allocates ids via the mailbox, dispatches background work onto `tokio::spawn`,
//! and serializes outcomes into the event codec before inserting them back into
//! the mailbox at the id they were allocated under (spec §4.G).

use std::sync::Arc;

use crate::backend::{Backend, LogFilter, PublicKeyInfo};
use crate::backend::callback::Callback;
use crate::errors::GatewayError;
use crate::events::{DeployServiceEvent, ErrorCause, ErrorEvent, Event, ExecuteServiceEvent};
use crate::mailbox::Mailbox;
use crate::subscriptions::SubscriptionManager;
use crate::wallet::executor::TransactionExecutor;

fn validate_session_key(session_key: &str) -> Result<(), GatewayError> {
    if session_key.is_empty() {
        return Err(GatewayError::InputError("Provided invalid key.".to_string()));
    }
    Ok(())
}

fn validate_address(address: &str) -> Result<(), GatewayError> {
    if address.len() != 42 || !address.starts_with("0x") || !address[2..].bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GatewayError::InputError(format!("invalid address: {address:?}")));
    }
    Ok(())
}

fn error_event(id: u64, err: GatewayError) -> Event {
    Event::Error(ErrorEvent {
        id,
        cause: ErrorCause {
            code: err.code().to_string(),
            description: err.to_string(),
        },
    })
}

pub struct RequestManager<B: Backend, C: Callback> {
    mailbox: Arc<Mailbox>,
    backend: Arc<B>,
    executor: Arc<TransactionExecutor<B, C>>,
    subscriptions: Arc<SubscriptionManager<B>>,
}

impl<B: Backend, C: Callback> RequestManager<B, C> {
    pub fn new(
        mailbox: Arc<Mailbox>,
        backend: Arc<B>,
        executor: Arc<TransactionExecutor<B, C>>,
        subscriptions: Arc<SubscriptionManager<B>>,
    ) -> Self {
        RequestManager {
            mailbox,
            backend,
            executor,
            subscriptions,
        }
    }

    /// Number of wallet owners backing the transaction executor; used by `/health`.
    pub fn wallet_count(&self) -> usize {
        self.executor.wallet_count()
    }

    /// Number of currently live subscriptions; used by `/health`.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub async fn get_public_key(&self, address: &str) -> Result<PublicKeyInfo, GatewayError> {
        if address.is_empty() {
            return Err(GatewayError::InputError("invalid address".to_string()));
        }
        Ok(self.backend.get_public_key(address).await?)
    }

    pub async fn execute_service_async(
        &self,
        session_key: &str,
        address: &str,
        data: Vec<u8>,
    ) -> Result<u64, GatewayError> {
        validate_session_key(session_key)?;
        validate_address(address)?;
        let id = self.mailbox.next(session_key).await?;

        let mailbox = Arc::clone(&self.mailbox);
        let executor = Arc::clone(&self.executor);
        let session_key = session_key.to_string();
        let address = address.to_string();
        tokio::spawn(async move {
            let aad = id.to_string();
            let outcome = executor.execute(aad, id, address, data).await;
            let event = match outcome {
                Ok((address, output)) => {
                    Event::ExecuteService(ExecuteServiceEvent { id, address, output })
                }
                Err(err) => error_event(id, GatewayError::from(err)),
            };
            insert_or_abort(&mailbox, &session_key, id, event).await;
        });
        Ok(id)
    }

    pub async fn deploy_service_async(
        &self,
        session_key: &str,
        data: Vec<u8>,
    ) -> Result<u64, GatewayError> {
        validate_session_key(session_key)?;
        let id = self.mailbox.next(session_key).await?;

        let mailbox = Arc::clone(&self.mailbox);
        let executor = Arc::clone(&self.executor);
        let session_key = session_key.to_string();
        tokio::spawn(async move {
            let aad = id.to_string();
            let outcome = executor.execute(aad, id, String::new(), data).await;
            let event = match outcome {
                Ok((address, _output)) => Event::DeployService(DeployServiceEvent { id, address }),
                Err(err) => error_event(id, GatewayError::from(err)),
            };
            insert_or_abort(&mailbox, &session_key, id, event).await;
        });
        Ok(id)
    }

    pub async fn subscribe(
        &self,
        session_key: &str,
        address: &str,
        topics: Vec<String>,
    ) -> Result<u64, GatewayError> {
        validate_session_key(session_key)?;
        let filter = LogFilter {
            address: address.to_string(),
            topics,
        };
        Ok(self.subscriptions.subscribe(session_key, filter).await?)
    }

    pub async fn unsubscribe(&self, session_key: &str, id: u64) -> Result<(), GatewayError> {
        validate_session_key(session_key)?;
        Ok(self.subscriptions.unsubscribe(session_key, id).await?)
    }

    pub async fn poll_service(
        &self,
        session_key: &str,
        offset: u64,
        count: usize,
        discard_previous: bool,
    ) -> Result<(u64, Vec<Event>), GatewayError> {
        validate_session_key(session_key)?;
        self.poll(session_key, offset, count, discard_previous).await
    }

    pub async fn poll_event(
        &self,
        session_key: &str,
        id: u64,
        offset: u64,
        count: usize,
        discard_previous: bool,
    ) -> Result<(u64, Vec<Event>), GatewayError> {
        validate_session_key(session_key)?;
        let key = SubscriptionManager::<B>::sub_key(session_key, id);
        self.poll(&key, offset, count, discard_previous).await
    }

    async fn poll(
        &self,
        key: &str,
        offset: u64,
        count: usize,
        discard_previous: bool,
    ) -> Result<(u64, Vec<Event>), GatewayError> {
        if discard_previous {
            // `Count=0` with `keep_previous=false` means "slide only" (spec §9).
            self.mailbox.discard(key, offset, 0, false).await?;
        }
        let elements = self.mailbox.retrieve(key, offset, count).await?;
        let mut events = Vec::with_capacity(elements.elements.len());
        for element in &elements.elements {
            events.push(Event::try_from_element(element)?);
        }
        Ok((elements.offset, events))
    }
}

/// Inserts `event` at `id` in `session_key`'s mailbox. A failure here would mean
/// a client that already received an id can never learn its outcome; spec §7
/// treats that as fatal to the process rather than a silently dropped reply.
async fn insert_or_abort(mailbox: &Mailbox, session_key: &str, id: u64, event: Event) {
    let (r#type, value) = match event.encode() {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!(session_key, id, error = %err, "failed to encode event for delivery, aborting");
            std::process::abort();
        }
    };
    if let Err(err) = mailbox.insert(session_key, id, r#type, value).await {
        tracing::error!(session_key, id, error = %err, "failed to deliver reply for issued id, aborting");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, CallMsg, Log, SendTransactionResult, TransactionReceipt, TransactionStatus,
    };
    use alloy_signer_local::PrivateKeySigner;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct HappyBackend {
        nonce: AtomicU64,
    }

    impl Backend for HappyBackend {
        async fn get_public_key(&self, address: &str) -> Result<PublicKeyInfo, BackendError> {
            Ok(PublicKeyInfo {
                address: address.to_string(),
                public_key: "0xpub".into(),
                timestamp: 1,
                signature: "0xsig".into(),
            })
        }
        async fn nonce_at(&self, _address: &str) -> Result<u64, BackendError> {
            Ok(self.nonce.load(Ordering::SeqCst))
        }
        async fn balance_at(&self, _address: &str) -> Result<u128, BackendError> {
            Ok(1_000_000)
        }
        async fn estimate_gas(&self, _call: &CallMsg) -> Result<u64, BackendError> {
            Ok(21_000)
        }
        async fn send_transaction(&self, _signed_tx: &[u8]) -> Result<SendTransactionResult, BackendError> {
            self.nonce.fetch_add(1, Ordering::SeqCst);
            Ok(SendTransactionResult {
                status: TransactionStatus::Ok,
                output: b"success".to_vec(),
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

    async fn manager() -> RequestManager<HappyBackend, NoopCallback> {
        let backend = Arc::new(HappyBackend {
            nonce: AtomicU64::new(0),
        });
        let mailbox = Arc::new(Mailbox::new(64, Duration::from_secs(600), CancellationToken::new()));
        let signer = PrivateKeySigner::from_bytes(&{
            let mut bytes = [0u8; 32];
            bytes[31] = 7;
            bytes.into()
        })
        .unwrap();
        let executor = Arc::new(
            TransactionExecutor::new(
                vec![signer],
                1,
                Arc::clone(&backend),
                Arc::new(NoopCallback),
                2,
                10,
                CancellationToken::new(),
            )
            .await
            .unwrap(),
        );
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&mailbox),
            Arc::clone(&backend),
            CancellationToken::new(),
        ));
        RequestManager::new(mailbox, backend, executor, subscriptions)
    }

    #[tokio::test]
    async fn execute_service_async_delivers_an_execute_event_on_success() {
        let rm = manager().await;
        let id = rm
            .execute_service_async(
                "s",
                "0x0000000000000000000000000000000000000000",
                b"\x00".to_vec(),
            )
            .await
            .unwrap();
        assert_eq!(id, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (offset, events) = rm.poll_service("s", 0, 1, false).await.unwrap();
        assert_eq!(offset, 0);
        match &events[0] {
            Event::ExecuteService(e) => {
                assert_eq!(e.id, 0);
                assert_eq!(e.output, format!("0x{}", hex::encode(b"success")));
            }
            other => panic!("expected ExecuteServiceEvent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn two_rapid_calls_on_the_same_session_return_dense_increasing_ids() {
        let rm = manager().await;
        let a = rm
            .execute_service_async("s", "0x0000000000000000000000000000000000000000", vec![])
            .await
            .unwrap();
        let b = rm
            .execute_service_async("s", "0x0000000000000000000000000000000000000001", vec![])
            .await
            .unwrap();
        assert_eq!((a, b), (0, 1));
    }

    #[tokio::test]
    async fn subscribe_with_empty_session_key_is_input_error_without_mutating_mailbox() {
        let rm = manager().await;
        let err = rm.subscribe("", "address", vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::InputError(msg) if msg == "Provided invalid key."));
        assert_eq!(rm.subscriptions.len(), 0);
    }

    #[tokio::test]
    async fn execute_service_async_rejects_malformed_addresses() {
        let rm = manager().await;
        let err = rm
            .execute_service_async("s", "not-an-address", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InputError(_)));
    }
}
