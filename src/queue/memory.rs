//! In-memory [`WorkItemSource`], for tests and the single-process client.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::model::{WorkDispatch, WorkItemKind};

use super::source::{QueueSink, ReceivedItem, SourceError, WorkItemSource, BATCH_CAP};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    message_id: String,
    dispatch: WorkDispatch,
    dequeue_count: u32,
    visible_at: Instant,
}

/// `tokio`-channel-backed queue transport. A single process-wide in-memory
/// "queue": items become invisible once received and only reappear if
/// abandoned or their lease expires without being completed.
pub struct InMemoryWorkItemSource {
    kind: WorkItemKind,
    pending: Mutex<VecDeque<Entry>>,
    in_flight: Mutex<std::collections::HashMap<String, Entry>>,
    notify: Notify,
    closed: std::sync::atomic::AtomicBool,
}

impl InMemoryWorkItemSource {
    pub fn new(kind: WorkItemKind) -> Self {
        Self {
            kind,
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(std::collections::HashMap::new()),
            notify: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Enqueue a freshly produced dispatch envelope.
    pub fn enqueue(&self, dispatch: WorkDispatch) {
        let entry = Entry {
            message_id: Uuid::now_v7().to_string(),
            dispatch,
            dequeue_count: 0,
            visible_at: Instant::now(),
        };
        self.pending.lock().push_back(entry);
        self.notify.notify_one();
    }

    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl WorkItemSource for InMemoryWorkItemSource {
    fn kind(&self) -> WorkItemKind {
        self.kind
    }

    async fn receive_batch(&self, max_items: usize) -> Result<Vec<ReceivedItem>, SourceError> {
        let cap = max_items.min(BATCH_CAP).max(1);
        loop {
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(SourceError::Closed);
            }

            let mut received = Vec::new();
            {
                let now = Instant::now();
                let mut pending = self.pending.lock();
                let mut requeue = VecDeque::new();
                while let Some(entry) = pending.pop_front() {
                    if entry.visible_at > now {
                        requeue.push_back(entry);
                        continue;
                    }
                    received.push(entry);
                    if received.len() >= cap {
                        break;
                    }
                }
                requeue.extend(pending.drain(..));
                *pending = requeue;
            }

            if !received.is_empty() {
                let mut in_flight = self.in_flight.lock();
                let mut out = Vec::with_capacity(received.len());
                for mut entry in received {
                    entry.dequeue_count += 1;
                    let pop_receipt = Uuid::now_v7().to_string();
                    out.push(ReceivedItem {
                        dispatch: entry.dispatch.clone(),
                        message_id: entry.message_id.clone(),
                        pop_receipt: pop_receipt.clone(),
                        dequeue_count: entry.dequeue_count,
                    });
                    in_flight.insert(pop_receipt, entry);
                }
                return Ok(out);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    async fn complete(&self, item: &ReceivedItem) -> Result<(), SourceError> {
        self.in_flight
            .lock()
            .remove(&item.pop_receipt)
            .ok_or(SourceError::LeaseExpired)?;
        Ok(())
    }

    async fn abandon(&self, item: &ReceivedItem, visibility_delay: Duration) -> Result<(), SourceError> {
        let mut entry = self
            .in_flight
            .lock()
            .remove(&item.pop_receipt)
            .ok_or(SourceError::LeaseExpired)?;
        entry.visible_at = Instant::now() + visibility_delay;
        self.pending.lock().push_back(entry);
        self.notify.notify_one();
        Ok(())
    }

    async fn try_renew_lock(&self, item: &ReceivedItem, extension: Duration) -> Result<(), SourceError> {
        let mut in_flight = self.in_flight.lock();
        let entry = in_flight.get_mut(&item.pop_receipt).ok_or(SourceError::LeaseExpired)?;
        entry.visible_at = Instant::now() + extension + DEFAULT_VISIBILITY_TIMEOUT;
        Ok(())
    }
}

#[async_trait]
impl QueueSink for InMemoryWorkItemSource {
    async fn enqueue(&self, dispatch: WorkDispatch, delay: Duration) -> Result<(), SourceError> {
        let entry = Entry {
            message_id: Uuid::now_v7().to_string(),
            dispatch,
            dequeue_count: 0,
            visible_at: Instant::now() + delay,
        };
        self.pending.lock().push_back(entry);
        self.notify.notify_one();
        Ok(())
    }
}
