//! In-process queue with the same settlement rules as the Redis stream
//!
//! Used by tests on both sides of the pipeline. Requeued deliveries go back to
//! the front of the ready list, so they are redelivered before newer
//! messages.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use super::{AuditPublisher, AuditSource, DeclareMode, Delivery, QueueError};
use crate::audit::message::AuditMessage;

#[derive(Default)]
struct State {
    exists: bool,
    next_seq: u64,
    ready: VecDeque<Delivery>,
    unacked: HashMap<String, Delivery>,
    acked: Vec<String>,
    dropped: Vec<String>,
    dead: Vec<(Delivery, String)>,
}

#[derive(Default)]
pub struct MemoryQueue {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    publish_failures: AtomicU32,
    receive_failures: AtomicU32,
}

impl MemoryQueue {
    /// A queue that does not exist until declared or published to
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A queue that already exists
    pub fn declared(name: impl Into<String>) -> Self {
        let queue = Self::new(name);
        queue.lock().exists = true;
        queue
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Poisoning only happens if a test panicked while holding the lock
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues raw bytes, bypassing serialization
    pub fn publish_raw(&self, payload: impl Into<Vec<u8>>) -> String {
        let id = {
            let mut state = self.lock();
            state.exists = true;
            state.next_seq += 1;
            let id = format!("{}-0", state.next_seq);
            state.ready.push_back(Delivery {
                id: id.clone(),
                payload: payload.into(),
            });
            id
        };
        self.notify.notify_one();
        id
    }

    /// The next `count` publishes fail with a connection error
    pub fn fail_next_publishes(&self, count: u32) {
        self.publish_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` receives fail with a connection error
    pub fn fail_next_receives(&self, count: u32) {
        self.receive_failures.store(count, Ordering::SeqCst);
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn unacked_len(&self) -> usize {
        self.lock().unacked.len()
    }

    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    pub fn dropped(&self) -> Vec<String> {
        self.lock().dropped.clone()
    }

    /// Dead-lettered deliveries with their reasons
    pub fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.lock().dead.clone()
    }

    /// Decoded copies of every message not yet settled
    pub fn pending_messages(&self) -> Vec<AuditMessage> {
        let state = self.lock();
        state
            .unacked
            .values()
            .chain(state.ready.iter())
            .filter_map(|d| AuditMessage::decode(&d.payload).ok())
            .collect()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_ready(&self, max: usize) -> Vec<Delivery> {
        let mut state = self.lock();
        let count = max.min(state.ready.len());
        let batch: Vec<Delivery> = state.ready.drain(..count).collect();
        for delivery in &batch {
            state.unacked.insert(delivery.id.clone(), delivery.clone());
        }
        batch
    }

    fn settle(&self, delivery: &Delivery) -> Result<Delivery, QueueError> {
        self.lock()
            .unacked
            .remove(&delivery.id)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.id.clone()))
    }
}

#[async_trait]
impl AuditPublisher for MemoryQueue {
    async fn publish(&self, message: &AuditMessage) -> Result<String, QueueError> {
        if Self::take_failure(&self.publish_failures) {
            return Err(QueueError::Connection("injected publish failure".to_string()));
        }
        let payload = message.encode()?;
        Ok(self.publish_raw(payload))
    }
}

#[async_trait]
impl AuditSource for MemoryQueue {
    async fn declare(&self, mode: DeclareMode) -> Result<(), QueueError> {
        let mut state = self.lock();
        match mode {
            DeclareMode::Create => {
                state.exists = true;
                Ok(())
            }
            DeclareMode::Passive if state.exists => Ok(()),
            DeclareMode::Passive => Err(QueueError::NotFound(self.name.clone())),
        }
    }

    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>, QueueError> {
        if Self::take_failure(&self.receive_failures) {
            return Err(QueueError::Connection("injected receive failure".to_string()));
        }
        if !self.lock().exists {
            return Err(QueueError::NotFound(self.name.clone()));
        }

        let batch = self.take_ready(max);
        if !batch.is_empty() || block.is_zero() {
            return Ok(batch);
        }

        // notify_one stores a permit, so a publish between the check above
        // and this await is not lost
        let _ = tokio::time::timeout(block, self.notify.notified()).await;
        Ok(self.take_ready(max))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let settled = self.settle(delivery)?;
        self.lock().acked.push(settled.id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let settled = self.settle(delivery)?;
        if requeue {
            self.lock().ready.push_front(settled);
            self.notify.notify_one();
        } else {
            self.lock().dropped.push(settled.id);
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let settled = self.settle(delivery)?;
        self.lock().dead.push((settled, reason.to_string()));
        Ok(())
    }
}
