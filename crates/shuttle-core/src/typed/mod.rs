//! Typed - typed message API on top of raw envelopes.
//!
//! - **Surface (typed)**: `Message` trait, `Handler<T>` trait
//! - **Inside (dyn)**: `DynHandler` trait, type-erased and object-safe
//! - **TypedRegistry**: handlers by message type; implements `MessageReceiver`

pub mod handler;
pub mod message;
pub mod registry;

pub use self::handler::{DispatchError, DynHandler, Handler, TypedHandler};
pub use self::message::Message;
pub use self::registry::{RegistryError, TypedRegistry};
