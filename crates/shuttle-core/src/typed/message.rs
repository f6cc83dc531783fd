//! Message trait - binds a message type tag to a Rust type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A payload type that travels through a queue as JSON.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// impl Message for OrderPlaced {
///     const TYPE: &'static str = "shop.order.placed.v1";
/// }
/// ```
///
/// The tag is written to `MessageEnvelope::message_type` and used by
/// `TypedRegistry` to pick the handler.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Naming convention: `{namespace}.{domain}.{event}.v{major}`.
    const TYPE: &'static str;
}
