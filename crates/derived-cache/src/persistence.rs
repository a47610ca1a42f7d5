//! Persistence tier adapter
//!
//! Bridges a cache manager to its [`BackingStore`]. Reads are awaited by the
//! caller; mutations (put, delete, clear) go through a single writer task so
//! they reach the store in submission order. Every store call is bounded by
//! the configured timeout. Failures are logged and counted, never returned.

use crate::codec::ValueCodec;
use crate::entry::is_expired;
use crate::error::{CacheError, Result};
use crate::stats::StatsTracker;
use crate::store::BackingStore;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const ENVELOPE_MAGIC: [u8; 4] = *b"DVCE";
const ENVELOPE_VERSION: u32 = 1;
const ENVELOPE_HEADER_LEN: usize = 24;

/// Value read back from the backing store
#[derive(Debug, Clone)]
pub struct PersistedEntry<V> {
    pub value: V,
    pub created_at: SystemTime,
    pub ttl: Duration,
    /// Encoded payload length, reused as the size estimate on promotion
    pub encoded_size: usize,
}

enum WriteOp {
    Put {
        key: String,
        bytes: Vec<u8>,
        ttl: Duration,
    },
    Delete {
        key: String,
        ack: Option<oneshot::Sender<()>>,
    },
    Clear {
        ack: oneshot::Sender<()>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Outcome of a read-through
#[derive(Debug)]
pub enum Loaded<V> {
    Entry(PersistedEntry<V>),
    /// Expired or malformed envelope; the caller decides whether to drop it
    Stale,
    Missing,
}

/// Adapter between a cache manager and its backing store
pub struct PersistenceTier<V> {
    store: Arc<dyn BackingStore>,
    codec: Arc<dyn ValueCodec<V>>,
    namespace: String,
    timeout: Duration,
    stats: Arc<StatsTracker>,
    writer: Mutex<Option<mpsc::UnboundedSender<WriteOp>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V> PersistenceTier<V> {
    /// Create the adapter and start its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        store: Arc<dyn BackingStore>,
        codec: Arc<dyn ValueCodec<V>>,
        namespace: impl Into<String>,
        timeout: Duration,
        stats: Arc<StatsTracker>,
    ) -> Self {
        let namespace = namespace.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(
            Arc::clone(&store),
            namespace.clone(),
            timeout,
            Arc::clone(&stats),
            rx,
        ));

        Self {
            store,
            codec,
            namespace,
            timeout,
            stats,
            writer: Mutex::new(Some(tx)),
            writer_handle: Mutex::new(Some(handle)),
        }
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Read through to the store.
    ///
    /// Absence, timeouts, store failures and payloads that do not decode are
    /// all `Missing`. Nothing is queued here: a write submitted while the
    /// read was in flight must not be undone by it.
    pub async fn load(&self, key: &str) -> Loaded<V> {
        let store_key = self.store_key(key);
        let bytes = match bounded(self.timeout, self.store.get(&store_key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Loaded::Missing,
            Err(e) => {
                self.stats.record_persistence_error();
                tracing::warn!(
                    "Read of '{}' from {} store failed: {}",
                    store_key,
                    self.store.name(),
                    e
                );
                return Loaded::Missing;
            }
        };

        let (created_at, ttl, payload) = match decode_envelope(&bytes) {
            Ok(parts) => parts,
            Err(e) => {
                self.stats.record_persistence_error();
                tracing::warn!("Discarding persisted '{}': {}", store_key, e);
                return Loaded::Stale;
            }
        };

        if is_expired(created_at, ttl, SystemTime::now()) {
            tracing::debug!("Persisted '{}' has expired", store_key);
            return Loaded::Stale;
        }

        match self.codec.decode(payload) {
            Ok(value) => Loaded::Entry(PersistedEntry {
                value,
                created_at,
                ttl,
                encoded_size: payload.len(),
            }),
            Err(e) => {
                self.stats.record_persistence_error();
                tracing::warn!(
                    "Persisted '{}' does not decode with {} codec: {}",
                    store_key,
                    self.codec.name(),
                    e
                );
                Loaded::Missing
            }
        }
    }

    /// Queue a write-through of an already encoded value
    pub fn write(&self, key: &str, payload: &[u8], created_at: SystemTime, ttl: Duration) {
        let remaining = match SystemTime::now().duration_since(created_at) {
            Ok(age) => ttl.saturating_sub(age),
            Err(_) => ttl,
        };
        if remaining.is_zero() {
            return;
        }

        self.submit(WriteOp::Put {
            key: self.store_key(key),
            bytes: encode_envelope(created_at, ttl, payload),
            ttl: remaining,
        });
    }

    /// Queue a removal without waiting for it
    pub fn remove(&self, key: &str) {
        self.submit(WriteOp::Delete {
            key: self.store_key(key),
            ack: None,
        });
    }

    /// Queue a removal. Await [`PendingWrite::wait`] to know the store has
    /// applied it.
    ///
    /// The removal is ordered against other writes when this is called.
    pub fn delete(&self, key: &str) -> PendingWrite {
        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(WriteOp::Delete {
            key: self.store_key(key),
            ack: Some(tx),
        });
        self.ack(submitted.then_some(rx), "delete")
    }

    /// Queue removal of the whole namespace; see [`PersistenceTier::delete`]
    pub fn clear(&self) -> PendingWrite {
        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(WriteOp::Clear { ack: tx });
        self.ack(submitted.then_some(rx), "clear")
    }

    /// Wait until every write queued so far has been attempted
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.submit(WriteOp::Flush { ack: tx }) {
            let _ = rx.await;
        }
    }

    /// Stop accepting writes; queued writes still run to completion
    pub fn close(&self) -> Option<JoinHandle<()>> {
        self.writer.lock().take();
        self.writer_handle.lock().take()
    }

    fn submit(&self, op: WriteOp) -> bool {
        let writer = self.writer.lock();
        match writer.as_ref() {
            Some(tx) => {
                if tx.send(op).is_err() {
                    self.stats.record_persistence_error();
                    tracing::warn!("{}", CacheError::WriterClosed);
                    return false;
                }
                true
            }
            None => {
                tracing::debug!(
                    "Persistence tier '{}' is closed, dropping write",
                    self.namespace
                );
                false
            }
        }
    }

    fn ack(&self, rx: Option<oneshot::Receiver<()>>, op: &'static str) -> PendingWrite {
        PendingWrite {
            rx,
            timeout: self.timeout,
            op,
            namespace: self.namespace.clone(),
        }
    }
}

/// Acknowledgement of a queued delete or clear
#[must_use = "the write is queued either way; wait() reports when it has been applied"]
pub struct PendingWrite {
    rx: Option<oneshot::Receiver<()>>,
    timeout: Duration,
    op: &'static str,
    namespace: String,
}

impl PendingWrite {
    /// Wait, at most the store timeout, for the writer to apply the operation
    pub async fn wait(self) {
        let Some(rx) = self.rx else {
            return;
        };
        if tokio::time::timeout(self.timeout, rx).await.is_err() {
            tracing::warn!(
                "{} on '{}' still pending after {:?}",
                self.op,
                self.namespace,
                self.timeout
            );
        }
    }
}

impl<V> Drop for PersistenceTier<V> {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit on its own
        self.writer.lock().take();
    }
}

impl<V> std::fmt::Debug for PersistenceTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceTier")
            .field("store", &self.store.name())
            .field("codec", &self.codec.name())
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn run_writer(
    store: Arc<dyn BackingStore>,
    namespace: String,
    timeout: Duration,
    stats: Arc<StatsTracker>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Put { key, bytes, ttl } => {
                let result = bounded(timeout, store.put(&key, bytes, ttl)).await;
                report(&stats, store.name(), "put", &key, result);
            }
            WriteOp::Delete { key, ack } => {
                let result = bounded(timeout, store.delete(&key)).await;
                report(&stats, store.name(), "delete", &key, result);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            WriteOp::Clear { ack } => {
                let result = bounded(timeout, store.clear(&namespace)).await;
                report(&stats, store.name(), "clear", &namespace, result);
                let _ = ack.send(());
            }
            WriteOp::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!("Persistence writer for '{}' stopped", namespace);
}

fn report(stats: &StatsTracker, store: &str, op: &str, key: &str, result: Result<()>) {
    if let Err(e) = result {
        stats.record_persistence_error();
        tracing::warn!("{} of '{}' on {} store failed: {}", op, key, store, e);
    }
}

async fn bounded<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout(timeout)),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Frame a payload with its creation time and TTL
pub fn encode_envelope(created_at: SystemTime, ttl: Duration, payload: &[u8]) -> Vec<u8> {
    let created_ms = created_at
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or(0);

    let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    bytes.extend_from_slice(&ENVELOPE_MAGIC);
    bytes.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&created_ms.to_le_bytes());
    bytes.extend_from_slice(&millis(ttl).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Split an envelope into creation time, TTL and payload
pub fn decode_envelope(bytes: &[u8]) -> Result<(SystemTime, Duration, &[u8])> {
    if bytes.len() < ENVELOPE_HEADER_LEN {
        return Err(CacheError::MalformedEnvelope(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }
    if bytes[0..4] != ENVELOPE_MAGIC {
        return Err(CacheError::MalformedEnvelope("bad magic".to_string()));
    }

    let word = |range: std::ops::Range<usize>| {
        let mut buf = [0u8; 8];
        buf[..range.len()].copy_from_slice(&bytes[range]);
        u64::from_le_bytes(buf)
    };

    let version = word(4..8);
    if version != u64::from(ENVELOPE_VERSION) {
        return Err(CacheError::MalformedEnvelope(format!(
            "unsupported version {}",
            version
        )));
    }

    let created_at = UNIX_EPOCH + Duration::from_millis(word(8..16));
    let ttl = Duration::from_millis(word(16..24));
    Ok((created_at, ttl, &bytes[ENVELOPE_HEADER_LEN..]))
}
