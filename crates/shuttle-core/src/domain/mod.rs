//! Domain model: envelopes, identifiers, capabilities, errors and the
//! per-operation context.

pub mod capabilities;
pub mod context;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use self::capabilities::{Capability, MessagingCapabilities};
pub use self::context::{CancelHandle, Context};
pub use self::envelope::MessageEnvelope;
pub use self::errors::{ErrorKind, InvalidStateReason, QueueError};
pub use self::ids::{LockToken, MessageId};
