//! Append-only audit log of classification decisions.
//!
//! Recording never blocks the caller on I/O: records land in a bounded
//! in-memory buffer and a background flush drains it into the sink. When the
//! sink is unavailable the batch is kept for the next flush, and the oldest
//! records are dropped once the buffer is full.

pub mod surreal;

use std::{
    collections::VecDeque,
    ops::Deref,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tracing::{Instrument, debug, instrument, warn};

use crate::base::{
    config::Config,
    types::{AuditRecord, Policy, Res, Topic, Void},
};

// Traits.

/// Generic audit sink trait that backends must implement.
#[async_trait]
pub trait GenericAuditSink: Send + Sync + 'static {
    /// Append a batch of records, in order.
    async fn append(&self, records: &[AuditRecord]) -> Void;

    /// The most recent records, newest first, for review.
    async fn recent(&self, limit: usize) -> Res<Vec<AuditRecord>>;
}

// Structs.

/// Audit sink for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct AuditSink {
    inner: Arc<dyn GenericAuditSink>,
}

impl Deref for AuditSink {
    type Target = dyn GenericAuditSink;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl AuditSink {
    pub fn new(inner: Arc<dyn GenericAuditSink>) -> Self {
        Self { inner }
    }
}

/// Fixed-capacity FIFO that drops the oldest record on overflow.
#[derive(Debug)]
pub struct AuditBuffer {
    records: VecDeque<AuditRecord>,
    capacity: usize,
}

impl AuditBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, returning the one evicted to make room, if any.
    pub fn push(&mut self, record: AuditRecord) -> Option<AuditRecord> {
        let evicted = if self.records.len() == self.capacity { self.records.pop_front() } else { None };
        self.records.push_back(record);
        evicted
    }

    /// Put an unwritten batch back ahead of newer records, trimming the oldest beyond capacity.
    ///
    /// Returns the number of records dropped.
    pub fn requeue(&mut self, batch: Vec<AuditRecord>) -> usize {
        for record in batch.into_iter().rev() {
            self.records.push_front(record);
        }

        let mut dropped = 0;
        while self.records.len() > self.capacity {
            self.records.pop_front();
            dropped += 1;
        }

        dropped
    }

    pub fn drain(&mut self) -> Vec<AuditRecord> {
        self.records.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter()
    }
}

/// Audit logger for the application.
///
/// It is designed to be trivially cloneable; clones share one buffer.
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<AuditLoggerInner>,
}

struct AuditLoggerInner {
    buffer: Mutex<AuditBuffer>,
    flushing: tokio::sync::Mutex<()>,
    sink: AuditSink,
    flush_timeout: Duration,
}

impl AuditLogger {
    pub fn new(sink: AuditSink, capacity: usize, flush_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(AuditLoggerInner {
                buffer: Mutex::new(AuditBuffer::new(capacity)),
                flushing: tokio::sync::Mutex::new(()),
                sink,
                flush_timeout,
            }),
        }
    }

    pub fn from_config(sink: AuditSink, config: &Config) -> Self {
        Self::new(sink, config.audit_capacity, config.audit_flush_timeout())
    }

    pub fn sink(&self) -> &AuditSink {
        &self.inner.sink
    }

    /// Record a decision and schedule a background flush.
    ///
    /// Never fails and never waits on the sink.
    #[instrument(skip_all, fields(question_id = question_id))]
    pub fn record(&self, question_id: &str, topic: Topic, policy: &Policy) {
        let record = AuditRecord::new(question_id, topic, policy.clone());

        if let Some(evicted) = self.lock_buffer().push(record) {
            warn!("Audit buffer full, dropped record for question `{}`.", evicted.question_id);
        }

        // Outside a tokio runtime the records wait for an explicit flush.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let logger = self.clone();
            handle.spawn(
                async move {
                    logger.flush().await;
                }
                .in_current_span(),
            );
        }
    }

    /// Write buffered records to the sink, returning how many were written.
    ///
    /// Only one flush runs at a time; a concurrent call returns `0` and leaves
    /// the records to the running flush, which keeps draining until the buffer
    /// is empty. Failures and timeouts are logged and the batch is re-buffered.
    #[instrument(skip_all)]
    pub async fn flush(&self) -> usize {
        let mut written = 0;

        loop {
            let Ok(guard) = self.inner.flushing.try_lock() else {
                return written;
            };

            let (count, drained) = self.flush_locked(guard).await;
            written += count;

            // A record pushed after the last drain, while the guard was still
            // held, had its own flush skipped.
            if !drained || self.lock_buffer().is_empty() {
                return written;
            }
        }
    }

    /// Like [`AuditLogger::flush`], but waits for a running flush instead of skipping.
    #[instrument(skip_all)]
    pub async fn flush_now(&self) -> usize {
        let guard = self.inner.flushing.lock().await;

        let (written, drained) = self.flush_locked(guard).await;

        if drained { written + self.flush().await } else { written }
    }

    /// Drain until empty or until a write fails; the flag is `false` on failure.
    async fn flush_locked(&self, _guard: tokio::sync::MutexGuard<'_, ()>) -> (usize, bool) {
        let mut written = 0;

        loop {
            let batch = self.lock_buffer().drain();
            if batch.is_empty() {
                return (written, true);
            }

            let count = batch.len();

            let failure = match tokio::time::timeout(self.inner.flush_timeout, self.inner.sink.append(&batch)).await {
                Ok(Ok(())) => {
                    debug!("Flushed {} audit records.", count);
                    written += count;
                    continue;
                }
                Ok(Err(err)) => format!("{err}"),
                Err(_) => format!("timed out after {:?}", self.inner.flush_timeout),
            };

            let dropped = self.lock_buffer().requeue(batch);
            warn!("Audit write failed ({}); kept {} records for retry, dropped {}.", failure, count.saturating_sub(dropped), dropped);

            return (written, false);
        }
    }

    /// Records waiting to be written, oldest first.
    pub fn pending(&self) -> Vec<AuditRecord> {
        self.lock_buffer().iter().cloned().collect()
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, AuditBuffer> {
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Tests.
