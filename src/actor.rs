//! Generic per-key actor substrate ("master/worker"), component B.
//!
//! A [`Master`] owns a set of [`WorkerActor`] instances, one per key, each running
//! its own single-threaded cooperative loop on a `tokio` task. All the higher-level
//! components in this crate (mailbox, wallet-owner pool, subscription manager) are
//! built on top of this substrate rather than sharing mutable state directly —
//! see `DESIGN.md` for why that tradeoff was made.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The behavior a worker implements. One instance is created per key and lives for
/// the lifetime of that key's worker task.
///
/// `Request`/`Reply`/`Error` mirror spec §4.B's `RequestWorkerEvent`/reply contract.
pub trait WorkerActor: Send + 'static {
    type Request: Send + 'static;
    type Reply: Send + 'static;
    type Error: Send + 'static;

    /// Handles one request to completion. Long-running I/O here is explicitly
    /// permitted by spec §5 — it blocks only this worker.
    fn handle(
        &mut self,
        request: Self::Request,
    ) -> impl Future<Output = Result<Self::Reply, Self::Error>> + Send;

    /// Runs once when the worker is destroyed, after its inbox has drained.
    fn on_stop(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async {}
    }
}

/// Errors raised by the master/worker substrate.
#[derive(Debug, thiserror::Error)]
pub enum MasterWorkerError {
    #[error("worker for key {0:?} already exists")]
    WorkerAlreadyExists(String),
    #[error("worker for key {0:?} was not found")]
    WorkerNotFound(String),
    #[error("request was cancelled")]
    Cancelled,
    #[error("worker channel closed unexpectedly")]
    ChannelClosed,
}

enum Envelope<W: WorkerActor> {
    Request {
        value: W::Request,
        reply: oneshot::Sender<Result<W::Reply, W::Error>>,
    },
}

struct WorkerEntry<W: WorkerActor> {
    tx: mpsc::Sender<Envelope<W>>,
    last_active_millis: Arc<AtomicU64>,
    join: JoinHandle<()>,
}

fn now_millis(epoch: Instant) -> u64 {
    Instant::now().saturating_duration_since(epoch).as_millis() as u64
}

/// A per-key actor pool. `F` constructs a fresh `W` for lazily-created keys.
pub struct Master<W, F>
where
    W: WorkerActor,
    F: Fn() -> W + Send + Sync + 'static,
{
    workers: Arc<DashMap<String, WorkerEntry<W>>>,
    factory: Arc<F>,
    create_on_request: bool,
    max_inactivity: Option<Duration>,
    rr_cursor: Arc<AtomicUsize>,
    epoch: Instant,
    _reaper: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl<W, F> Master<W, F>
where
    W: WorkerActor,
    F: Fn() -> W + Send + Sync + 'static,
{
    /// Builds a master. `create_on_request` controls whether [`Master::request`]
    /// auto-creates a missing worker (spec §4.B `CreateWorkerOnRequest`).
    pub fn new(
        factory: F,
        create_on_request: bool,
        max_inactivity: Option<Duration>,
        cancellation: CancellationToken,
    ) -> Self {
        let workers: Arc<DashMap<String, WorkerEntry<W>>> = Arc::new(DashMap::new());
        let epoch = Instant::now();
        let reaper = max_inactivity.map(|max_inactivity| {
            let workers = Arc::clone(&workers);
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(
                    (max_inactivity / 4).max(Duration::from_secs(1)),
                );
                loop {
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = tick.tick() => {
                            let now = now_millis(epoch);
                            let stale: Vec<String> = workers
                                .iter()
                                .filter(|e| {
                                    let idle = now.saturating_sub(e.value().last_active_millis.load(Ordering::Relaxed));
                                    idle >= max_inactivity.as_millis() as u64
                                })
                                .map(|e| e.key().clone())
                                .collect();
                            for key in stale {
                                if let Some((_, entry)) = workers.remove(&key) {
                                    tracing::debug!(key = %key, "evicting worker after max_inactivity");
                                    drop(entry.tx);
                                    let _ = entry.join.await;
                                }
                            }
                        }
                    }
                }
            })
        });
        Master {
            workers,
            factory: Arc::new(factory),
            create_on_request,
            max_inactivity,
            rr_cursor: Arc::new(AtomicUsize::new(0)),
            epoch,
            _reaper: reaper,
            cancellation,
        }
    }

    fn spawn_worker(&self, mut worker: W) -> WorkerEntry<W> {
        let (tx, mut rx) = mpsc::channel::<Envelope<W>>(256);
        let last_active_millis = Arc::new(AtomicU64::new(now_millis(self.epoch)));
        let la = Arc::clone(&last_active_millis);
        let epoch = self.epoch;
        let join = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Request { value, reply } => {
                        let result = worker.handle(value).await;
                        la.store(now_millis(epoch), Ordering::Relaxed);
                        let _ = reply.send(result);
                    }
                }
            }
            worker.on_stop().await;
        });
        WorkerEntry {
            tx,
            last_active_millis,
            join,
        }
    }

    /// Synchronously adds a worker. Fails if `key` is already present.
    pub fn create(&self, key: impl Into<String>, value: W) -> Result<(), MasterWorkerError> {
        let key = key.into();
        if self.workers.contains_key(&key) {
            return Err(MasterWorkerError::WorkerAlreadyExists(key));
        }
        let entry = self.spawn_worker(value);
        self.workers.insert(key, entry);
        Ok(())
    }

    /// Synchronously stops a worker: drops its sender (draining the inbox), then
    /// awaits its shutdown hook. Fails if `key` is absent.
    pub async fn destroy(&self, key: &str) -> Result<(), MasterWorkerError> {
        let (_, entry) = self
            .workers
            .remove(key)
            .ok_or_else(|| MasterWorkerError::WorkerNotFound(key.to_string()))?;
        drop(entry.tx);
        let _ = entry.join.await;
        Ok(())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.workers.contains_key(key)
    }

    /// Ensures `key`'s worker exists (auto-creating via the factory if
    /// `create_on_request` is set), forwards `msg`, and returns its reply.
    pub async fn request(
        &self,
        key: &str,
        msg: W::Request,
    ) -> Result<Result<W::Reply, W::Error>, MasterWorkerError> {
        if !self.workers.contains_key(key) {
            if self.create_on_request {
                let _ = self.workers.entry(key.to_string()).or_insert_with(|| {
                    let worker = (self.factory)();
                    self.spawn_worker(worker)
                });
            } else {
                return Err(MasterWorkerError::WorkerNotFound(key.to_string()));
            }
        }
        let tx = {
            let entry = self
                .workers
                .get(key)
                .ok_or_else(|| MasterWorkerError::WorkerNotFound(key.to_string()))?;
            entry.tx.clone()
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Envelope::Request {
            value: msg,
            reply: reply_tx,
        })
        .await
        .map_err(|_| MasterWorkerError::ChannelClosed)?;
        tokio::select! {
            reply = reply_rx => reply.map_err(|_| MasterWorkerError::ChannelClosed),
            _ = self.cancellation.cancelled() => Err(MasterWorkerError::Cancelled),
        }
    }

    /// Sends `msg` to an unspecified available worker, chosen round-robin over the
    /// live worker set so that load is fair over time (spec §4.B).
    pub async fn execute(
        &self,
        msg: W::Request,
    ) -> Result<Result<W::Reply, W::Error>, MasterWorkerError>
    where
        W::Request: Clone,
    {
        let keys: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        if keys.is_empty() {
            return Err(MasterWorkerError::WorkerNotFound(
                "<no workers available>".to_string(),
            ));
        }
        let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % keys.len();
        self.request(&keys[idx], msg).await
    }

    /// Fans `msg` to every live worker and gathers `{key, result}` pairs.
    pub async fn broadcast(
        &self,
        msg: W::Request,
    ) -> Vec<(String, Result<Result<W::Reply, W::Error>, MasterWorkerError>)>
    where
        W::Request: Clone,
    {
        let keys: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            let msg = msg.clone();
            let tx = self.workers.get(&key).map(|e| e.tx.clone());
            let cancellation = self.cancellation.clone();
            handles.push(async move {
                let key2 = key.clone();
                let result: Result<Result<W::Reply, W::Error>, MasterWorkerError> = match tx {
                    Some(tx) => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        match tx.send(Envelope::Request { value: msg, reply: reply_tx }).await {
                            Ok(()) => tokio::select! {
                                reply = reply_rx => reply.map_err(|_| MasterWorkerError::ChannelClosed),
                                _ = cancellation.cancelled() => Err(MasterWorkerError::Cancelled),
                            },
                            Err(_) => Err(MasterWorkerError::ChannelClosed),
                        }
                    }
                    None => Err(MasterWorkerError::WorkerNotFound(key2.clone())),
                };
                (key, result)
            });
        }
        let mut out = Vec::with_capacity(handles.len());
        for fut in handles {
            out.push(fut.await);
        }
        out
    }

    /// Number of live workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }
}

/// A deterministic, non-cryptographic hash of a key — occasionally useful for
/// sharding keys across a fixed-size resource pool that isn't itself a `Master`.
pub fn stable_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
