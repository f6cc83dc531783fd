//! Identifiers used by the queue (strongly-typed IDs).
//!
//! - [`MessageId`] is ULID based: generated without coordination, sortable by
//!   creation time, serialized as its 26-character string form.
//! - [`LockToken`] is a per-queue sequence number handed out by `receive`.
//!   The envelope only carries the token; the locked record itself lives in
//!   the queue's lock table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Globally unique identifier of a message, assigned once at construction.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Ulid);

impl MessageId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle identifying one in-flight (checked-out) envelope.
///
/// Tokens issued by one queue instance are strictly increasing. Broker
/// adapters may store their own delivery reference (offset, delivery tag) in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockToken(u64);

impl LockToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock-{}", self.0)
    }
}
