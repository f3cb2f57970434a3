//! Per-key message queue (component C), built over the master/worker substrate.
//!
//! Each mailbox key is a worker whose user-data is a [`SlidingWindow`] (component A).
//! This module implements spec §4.C's `Next/Insert/Retrieve/Discard/Remove/Exists`
//! surface; the caller (request manager, subscription manager) decides retry policy —
//! the mailbox itself reports failure rather than retrying.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::actor::{Master, MasterWorkerError, WorkerActor};
use crate::sliding_window::{Elements, SlidingWindow, SlidingWindowError};

/// Default inactivity timeout before an idle mailbox key is destroyed.
pub const DEFAULT_MAX_INACTIVITY: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub enum MailboxRequest {
    Next,
    Insert {
        offset: u64,
        r#type: String,
        value: String,
    },
    Retrieve {
        offset: u64,
        count: usize,
    },
    Discard {
        offset: u64,
        count: u64,
        keep_previous: bool,
    },
}

#[derive(Debug, Clone)]
pub enum MailboxReply {
    Offset(u64),
    Inserted,
    Elements(Elements),
    Discarded(usize),
}

struct MailboxWorker {
    window: SlidingWindow,
}

impl WorkerActor for MailboxWorker {
    type Request = MailboxRequest;
    type Reply = MailboxReply;
    type Error = SlidingWindowError;

    async fn handle(&mut self, request: MailboxRequest) -> Result<MailboxReply, SlidingWindowError> {
        match request {
            MailboxRequest::Next => self.window.reserve_next().map(MailboxReply::Offset),
            MailboxRequest::Insert {
                offset,
                r#type,
                value,
            } => self
                .window
                .set(offset, r#type, value)
                .map(|_| MailboxReply::Inserted),
            MailboxRequest::Retrieve { offset, count } => {
                Ok(MailboxReply::Elements(self.window.get(offset, count)))
            }
            MailboxRequest::Discard {
                offset,
                count,
                keep_previous,
            } => {
                if !keep_previous {
                    self.window.slide(offset)?;
                }
                self.window.discard(offset, count).map(MailboxReply::Discarded)
            }
        }
    }
}

/// Errors surfaced by mailbox operations, named after spec §7's `Kind` column.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox next failed: {0}")]
    QueueNext(#[source] SlidingWindowError),
    #[error("mailbox insert failed: {0}")]
    QueueInsert(#[source] SlidingWindowError),
    #[error("mailbox retrieve failed: {0}")]
    QueueRetrieve(#[source] SlidingWindowError),
    #[error("mailbox discard failed: {0}")]
    QueueDiscard(#[source] SlidingWindowError),
    #[error("mailbox remove failed: {0}")]
    QueueRemove(#[source] MasterWorkerError),
    #[error("request was cancelled or the worker channel closed: {0}")]
    Unavailable(#[source] MasterWorkerError),
}

type MailboxMaster = Master<MailboxWorker, Box<dyn Fn() -> MailboxWorker + Send + Sync>>;

/// A collection of independent, lazily-created sliding windows keyed by an opaque
/// caller-owned string.
pub struct Mailbox {
    master: MailboxMaster,
    max_size: usize,
}

impl Mailbox {
    pub fn new(max_size: usize, max_inactivity: Duration, cancellation: CancellationToken) -> Self {
        let factory: Box<dyn Fn() -> MailboxWorker + Send + Sync> =
            Box::new(move || MailboxWorker {
                window: SlidingWindow::new(max_size),
            });
        Mailbox {
            master: Master::new(factory, false, Some(max_inactivity), cancellation),
            max_size,
        }
    }

    /// Idempotently ensures a worker exists for `key` (a mailbox key is created
    /// lazily on first `Next` or `Insert`).
    fn ensure(&self, key: &str) {
        if !self.master.exists(key) {
            let window = SlidingWindow::new(self.max_size);
            let _ = self.master.create(key.to_string(), MailboxWorker { window });
        }
    }

    pub async fn next(&self, key: &str) -> Result<u64, MailboxError> {
        self.ensure(key);
        match self
            .master
            .request(key, MailboxRequest::Next)
            .await
            .map_err(MailboxError::Unavailable)?
        {
            Ok(MailboxReply::Offset(o)) => Ok(o),
            Ok(_) => unreachable!("Next always replies with Offset"),
            Err(e) => Err(MailboxError::QueueNext(e)),
        }
    }

    pub async fn insert(
        &self,
        key: &str,
        offset: u64,
        r#type: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MailboxError> {
        self.ensure(key);
        match self
            .master
            .request(
                key,
                MailboxRequest::Insert {
                    offset,
                    r#type: r#type.into(),
                    value: value.into(),
                },
            )
            .await
            .map_err(MailboxError::Unavailable)?
        {
            Ok(_) => Ok(()),
            Err(e) => Err(MailboxError::QueueInsert(e)),
        }
    }

    pub async fn retrieve(
        &self,
        key: &str,
        offset: u64,
        count: usize,
    ) -> Result<Elements, MailboxError> {
        if !self.master.exists(key) {
            return Ok(Elements {
                offset,
                elements: Vec::new(),
            });
        }
        match self
            .master
            .request(key, MailboxRequest::Retrieve { offset, count })
            .await
            .map_err(MailboxError::Unavailable)?
        {
            Ok(MailboxReply::Elements(e)) => Ok(e),
            Ok(_) => unreachable!("Retrieve always replies with Elements"),
            Err(e) => Err(MailboxError::QueueRetrieve(e)),
        }
    }

    /// `keep_previous=false` performs a `Slide` then marks the range discarded;
    /// `keep_previous=true` only marks. A key with no elements yet is a no-op.
    pub async fn discard(
        &self,
        key: &str,
        offset: u64,
        count: u64,
        keep_previous: bool,
    ) -> Result<usize, MailboxError> {
        if !self.master.exists(key) {
            return Ok(0);
        }
        match self
            .master
            .request(
                key,
                MailboxRequest::Discard {
                    offset,
                    count,
                    keep_previous,
                },
            )
            .await
            .map_err(MailboxError::Unavailable)?
        {
            Ok(MailboxReply::Discarded(n)) => Ok(n),
            Ok(_) => unreachable!("Discard always replies with Discarded"),
            Err(e) => Err(MailboxError::QueueDiscard(e)),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), MailboxError> {
        self.master.destroy(key).await.map_err(MailboxError::QueueRemove)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.master.exists(key)
    }
}
