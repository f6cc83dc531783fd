//! Messaging capabilities advertised by a queue instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One operation a queue may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    MessageCount,
    Send,
    Receive,
    Peek,
    PeekBatch,
    RenewLock,
    Abandon,
    DeadLetter,
    Clear,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::MessageCount,
        Capability::Send,
        Capability::Receive,
        Capability::Peek,
        Capability::PeekBatch,
        Capability::RenewLock,
        Capability::Abandon,
        Capability::DeadLetter,
        Capability::Clear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::MessageCount => "message_count",
            Capability::Send => "send",
            Capability::Receive => "receive",
            Capability::Peek => "peek",
            Capability::PeekBatch => "peek_batch",
            Capability::RenewLock => "renew_lock",
            Capability::Abandon => "abandon",
            Capability::DeadLetter => "dead_letter",
            Capability::Clear => "clear",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable set of supported operations, fixed when the queue is built.
///
/// Callers branch on it before invoking optional operations; queues fail
/// unsupported operations with `QueueError::InvalidState` ("not supported").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingCapabilities {
    message_count: bool,
    send: bool,
    receive: bool,
    peek: bool,
    peek_batch: bool,
    renew_lock: bool,
    abandon: bool,
    dead_letter: bool,
    clear: bool,
}

impl MessagingCapabilities {
    /// Every operation supported (the in-memory engine's default).
    pub const fn all() -> Self {
        Self {
            message_count: true,
            send: true,
            receive: true,
            peek: true,
            peek_batch: true,
            renew_lock: true,
            abandon: true,
            dead_letter: true,
            clear: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            message_count: false,
            send: false,
            receive: false,
            peek: false,
            peek_batch: false,
            renew_lock: false,
            abandon: false,
            dead_letter: false,
            clear: false,
        }
    }

    /// Build from an explicit list of supported operations.
    pub fn from_supported(supported: &[Capability]) -> Self {
        supported
            .iter()
            .fold(Self::none(), |caps, capability| caps.with(*capability, true))
    }

    /// Copy of this set with `capability` removed.
    pub fn without(self, capability: Capability) -> Self {
        self.with(capability, false)
    }

    fn with(mut self, capability: Capability, enabled: bool) -> Self {
        match capability {
            Capability::MessageCount => self.message_count = enabled,
            Capability::Send => self.send = enabled,
            Capability::Receive => self.receive = enabled,
            Capability::Peek => self.peek = enabled,
            Capability::PeekBatch => self.peek_batch = enabled,
            Capability::RenewLock => self.renew_lock = enabled,
            Capability::Abandon => self.abandon = enabled,
            Capability::DeadLetter => self.dead_letter = enabled,
            Capability::Clear => self.clear = enabled,
        }
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::MessageCount => self.message_count,
            Capability::Send => self.send,
            Capability::Receive => self.receive,
            Capability::Peek => self.peek,
            Capability::PeekBatch => self.peek_batch,
            Capability::RenewLock => self.renew_lock,
            Capability::Abandon => self.abandon,
            Capability::DeadLetter => self.dead_letter,
            Capability::Clear => self.clear,
        }
    }

    pub fn can_message_count(&self) -> bool {
        self.message_count
    }

    pub fn can_send(&self) -> bool {
        self.send
    }

    pub fn can_receive(&self) -> bool {
        self.receive
    }

    pub fn can_peek(&self) -> bool {
        self.peek
    }

    pub fn can_peek_batch(&self) -> bool {
        self.peek_batch
    }

    pub fn can_renew_lock(&self) -> bool {
        self.renew_lock
    }

    pub fn can_abandon(&self) -> bool {
        self.abandon
    }

    pub fn can_dead_letter(&self) -> bool {
        self.dead_letter
    }

    pub fn can_clear(&self) -> bool {
        self.clear
    }

    /// Supported operations in declaration order.
    pub fn supported(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|capability| self.supports(*capability))
            .collect()
    }
}

impl Default for MessagingCapabilities {
    fn default() -> Self {
        Self::all()
    }
}
