//! Subscription manager (component F): creates/destroys per-subscription
//! forwarders that drain a backend event channel into a mailbox key.
//!
//! Each subscription's worker has no request/reply surface of its own — it is a
//! pure event-draining loop — so rather than forcing it through
//! [`crate::actor::Master`]'s request-driven `WorkerActor` contract, this module
//! implements the same per-key actor idiom directly (synchronous `Create`,
//! drain-then-stop `Destroy`, `Exists`) against a dedicated registry. See
//! `DESIGN.md` for why.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError, LogFilter};
use crate::events::{hex_encode, DataEvent, Event};
use crate::mailbox::{Mailbox, MailboxError};

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("subscription {0:?} already exists")]
    SubscriptionAlreadyExists(String),
    #[error("subscription {0:?} was not found")]
    SubscriptionNotFound(String),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
}

struct SubscriptionHandle {
    cancellation: CancellationToken,
    join: JoinHandle<()>,
}

pub struct SubscriptionManager<B: Backend> {
    mailbox: Arc<Mailbox>,
    backend: Arc<B>,
    subscriptions: DashMap<String, SubscriptionHandle>,
    cancellation: CancellationToken,
}

impl<B: Backend> SubscriptionManager<B> {
    pub fn new(mailbox: Arc<Mailbox>, backend: Arc<B>, cancellation: CancellationToken) -> Self {
        SubscriptionManager {
            mailbox,
            backend,
            subscriptions: DashMap::new(),
            cancellation,
        }
    }

    /// `SubinfoID(session_key) = "<session_key>:subinfo"` (spec §3, §4.F).
    pub fn subinfo_key(session_key: &str) -> String {
        format!("{session_key}:subinfo")
    }

    /// `SubID(session_key, id) = "<session_key>:sub:<id>"` (spec §3, §4.F).
    pub fn sub_key(session_key: &str, id: u64) -> String {
        format!("{session_key}:sub:{id}")
    }

    /// Allocates a subscription id from the subinfo mailbox, then creates its
    /// forwarder. Returns the allocated id.
    pub async fn subscribe(&self, session_key: &str, filter: LogFilter) -> Result<u64, SubscriptionError> {
        let subinfo_key = Self::subinfo_key(session_key);
        let id = self.mailbox.next(&subinfo_key).await?;
        let sub_key = Self::sub_key(session_key, id);

        if self.subscriptions.contains_key(&sub_key) {
            return Err(SubscriptionError::SubscriptionAlreadyExists(sub_key));
        }

        let mut receiver = self.backend.subscribe_filter_logs(filter).await?;
        let cancellation = self.cancellation.child_token();
        let mailbox = Arc::clone(&self.mailbox);
        let task_key = sub_key.clone();
        let task_cancellation = cancellation.clone();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancellation.cancelled() => break,
                    event = receiver.recv() => {
                        match event {
                            Some(log) => {
                                if let Err(err) = insert_data_event(&mailbox, &task_key, &log.data, &log.topics).await {
                                    tracing::warn!(key = %task_key, error = %err, "dropping malformed subscription event");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            let _ = mailbox.remove(&task_key).await;
        });

        self.subscriptions.insert(sub_key, SubscriptionHandle { cancellation, join });
        Ok(id)
    }

    /// Destroys the forwarder and signals the backend via the already-dropped
    /// receiver (dropping it releases the backend's resources for this filter).
    pub async fn unsubscribe(&self, session_key: &str, id: u64) -> Result<(), SubscriptionError> {
        let sub_key = Self::sub_key(session_key, id);
        let (_, handle) = self
            .subscriptions
            .remove(&sub_key)
            .ok_or_else(|| SubscriptionError::SubscriptionNotFound(sub_key.clone()))?;
        handle.cancellation.cancel();
        let _ = handle.join.await;
        Ok(())
    }

    pub fn exists(&self, session_key: &str, id: u64) -> bool {
        self.subscriptions.contains_key(&Self::sub_key(session_key, id))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

async fn insert_data_event(
    mailbox: &Mailbox,
    key: &str,
    data: &[u8],
    topics: &[Vec<u8>],
) -> Result<(), MailboxError> {
    let offset = mailbox.next(key).await?;
    let event = Event::Data(DataEvent {
        id: offset,
        data: hex_encode(data),
        topics: topics.iter().map(|t| hex_encode(t)).collect(),
    });
    let (r#type, value) = event
        .encode()
        .expect("DataEvent always serializes");
    mailbox.insert(key, offset, r#type, value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        CallMsg, Log, PublicKeyInfo, SendTransactionResult, TransactionReceipt, TransactionStatus,
    };
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    struct FakeBackend {
        tx: Mutex<Option<mpsc::Sender<Log>>>,
        rx: Mutex<Option<mpsc::Receiver<Log>>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(64);
            FakeBackend {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
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
            Ok(0)
        }
        async fn balance_at(&self, _address: &str) -> Result<u128, BackendError> {
            Ok(0)
        }
        async fn estimate_gas(&self, _call: &CallMsg) -> Result<u64, BackendError> {
            Ok(21_000)
        }
        async fn send_transaction(&self, _signed_tx: &[u8]) -> Result<SendTransactionResult, BackendError> {
            Ok(SendTransactionResult {
                status: TransactionStatus::Ok,
                output: vec![],
                hash: "0x".into(),
            })
        }
        async fn transaction_receipt(&self, _hash: &str) -> Result<TransactionReceipt, BackendError> {
            Ok(TransactionReceipt {
                contract_address: None,
                gas_used: 0,
                status: TransactionStatus::Ok,
            })
        }
        async fn get_code(&self, _address: &str) -> Result<String, BackendError> {
            Ok("0x".into())
        }
        async fn subscribe_filter_logs(&self, _filter: LogFilter) -> Result<mpsc::Receiver<Log>, BackendError> {
            Ok(self.rx.lock().await.take().expect("subscribed twice in test"))
        }
    }

    fn manager() -> (SubscriptionManager<FakeBackend>, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new());
        let mailbox = Arc::new(Mailbox::new(16, Duration::from_secs(600), CancellationToken::new()));
        (
            SubscriptionManager::new(mailbox, Arc::clone(&backend), CancellationToken::new()),
            backend,
        )
    }

    #[tokio::test]
    async fn subscribe_allocates_offset_zero_on_subinfo_and_names_key_deterministically() {
        let (mgr, _backend) = manager();
        let id = mgr.subscribe("session", LogFilter::default()).await.unwrap();
        assert_eq!(id, 0);
        assert!(mgr.exists("session", 0));
    }

    #[tokio::test]
    async fn backend_log_is_delivered_as_hex_encoded_data_event() {
        let (mgr, backend) = manager();
        let id = mgr.subscribe("session", LogFilter::default()).await.unwrap();
        let sender = backend.tx.lock().await.take().unwrap();
        sender
            .send(Log {
                data: vec![0xde, 0xad],
                topics: vec![vec![0xaa]],
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let key = SubscriptionManager::<FakeBackend>::sub_key("session", id);
        let got = mgr.mailbox.retrieve(&key, 0, 1).await.unwrap();
        let event = Event::try_from_element(&got.elements[0]).unwrap();
        match event {
            Event::Data(d) => {
                assert_eq!(d.data, "0xdead");
                assert_eq!(d.topics, vec!["0xaa".to_string()]);
                assert_eq!(d.id, 0);
            }
            other => panic!("expected DataEvent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_requires_existing_subscription() {
        let (mgr, _backend) = manager();
        let err = mgr.unsubscribe("session", 0).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::SubscriptionNotFound(_)));
    }

    #[tokio::test]
    async fn channel_close_tears_down_the_mailbox_key() {
        let (mgr, backend) = manager();
        let id = mgr.subscribe("session", LogFilter::default()).await.unwrap();
        let sender = backend.tx.lock().await.take().unwrap();
        drop(sender);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let key = SubscriptionManager::<FakeBackend>::sub_key("session", id);
        assert!(!mgr.mailbox.exists(&key));
    }
}
