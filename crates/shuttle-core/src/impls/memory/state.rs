//! Backlog + lock table of the in-memory queue.
//!
//! Everything here is synchronous and runs under the queue's single mutex,
//! so a backlog transition and its lock-table counterpart are always applied
//! together.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{LockToken, MessageEnvelope};
use crate::ports::{ConnectionParams, MessageReceiver};

use super::Listener;

/// A checked-out envelope.
#[derive(Debug, Clone)]
pub(crate) struct LockedMessage {
    pub envelope: MessageEnvelope,
    pub expiration_time: DateTime<Utc>,
    pub timeout: Duration,
}

impl LockedMessage {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time < now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenewOutcome {
    Renewed,
    Expired,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbandonOutcome {
    Requeued,
    /// Lock already lapsed; presumed redelivered elsewhere.
    Expired,
    Missing,
}

#[derive(Default)]
pub(crate) struct QueueState {
    pub opened: bool,
    pub connection: Option<ConnectionParams>,
    pub listener: Option<Listener>,
    backlog: VecDeque<MessageEnvelope>,
    locked: HashMap<LockToken, LockedMessage>,
    last_token: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn locked_len(&self) -> usize {
        self.locked.len()
    }

    pub fn push(&mut self, envelope: MessageEnvelope) {
        self.backlog.push_back(envelope);
    }

    pub fn peek(&self) -> Option<MessageEnvelope> {
        self.backlog.front().cloned()
    }

    pub fn peek_batch(&self, max_messages: usize) -> Vec<MessageEnvelope> {
        self.backlog.iter().take(max_messages).cloned().collect()
    }

    /// Drain the whole backlog in FIFO order.
    pub fn take_backlog(&mut self) -> VecDeque<MessageEnvelope> {
        std::mem::take(&mut self.backlog)
    }

    /// Put undelivered envelopes back ahead of anything sent since.
    pub fn restore_backlog(&mut self, mut front: VecDeque<MessageEnvelope>) {
        front.append(&mut self.backlog);
        self.backlog = front;
    }

    /// True while `receiver` is the installed listener.
    pub fn listens_with(&self, receiver: &Arc<dyn MessageReceiver>) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| Arc::ptr_eq(&listener.receiver, receiver))
    }

    fn allocate_token(&mut self) -> LockToken {
        self.last_token += 1;
        LockToken::new(self.last_token)
    }

    /// Pop the backlog head and check it out until `now + timeout`.
    pub fn pop_and_lock(&mut self, now: DateTime<Utc>, timeout: Duration) -> Option<MessageEnvelope> {
        let mut envelope = self.backlog.pop_front()?;
        let token = self.allocate_token();
        envelope.set_lock_token(Some(token));
        self.locked.insert(
            token,
            LockedMessage {
                envelope: envelope.clone(),
                expiration_time: expiration(now, timeout),
                timeout,
            },
        );
        Some(envelope)
    }

    pub fn renew(&mut self, token: LockToken, now: DateTime<Utc>, timeout: Duration) -> RenewOutcome {
        let Some(locked) = self.locked.get_mut(&token) else {
            return RenewOutcome::Missing;
        };
        if locked.is_expired(now) {
            return RenewOutcome::Expired;
        }
        locked.expiration_time = expiration(now, timeout);
        locked.timeout = timeout;
        RenewOutcome::Renewed
    }

    pub fn complete(&mut self, token: LockToken) -> bool {
        self.locked.remove(&token).is_some()
    }

    /// Release the lock; requeue at the tail unless it already expired.
    pub fn abandon(&mut self, token: LockToken, now: DateTime<Utc>) -> AbandonOutcome {
        let Some(locked) = self.locked.remove(&token) else {
            return AbandonOutcome::Missing;
        };
        if locked.is_expired(now) {
            return AbandonOutcome::Expired;
        }
        let mut envelope = locked.envelope;
        envelope.set_lock_token(None);
        self.backlog.push_back(envelope);
        AbandonOutcome::Requeued
    }

    /// Release the lock for good.
    pub fn dead_letter(&mut self, token: LockToken) -> bool {
        self.locked.remove(&token).is_some()
    }

    /// Drop backlog and lock table; returns how many entries each held.
    pub fn clear(&mut self) -> (usize, usize) {
        let cleared = (self.backlog.len(), self.locked.len());
        self.backlog.clear();
        self.locked.clear();
        cleared
    }

    #[cfg(test)]
    pub fn lock_expiration(&self, token: LockToken) -> Option<(DateTime<Utc>, Duration)> {
        self.locked
            .get(&token)
            .map(|locked| (locked.expiration_time, locked.timeout))
    }
}

fn expiration(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
