//! Handler trait - typed handlers and their object-safe wrapper.
//!
//! `Handler<T>` is what applications implement. `TypedHandler<T, H>` erases
//! `T` behind `DynHandler` so handlers for different types can share one map.

use async_trait::async_trait;
use std::marker::PhantomData;

use super::message::Message;
use crate::domain::{MessageEnvelope, QueueError};
use crate::ports::ReceiverError;

#[async_trait]
pub trait Handler<T: Message>: Send + Sync {
    async fn handle(&self, message: T, envelope: &MessageEnvelope) -> Result<(), ReceiverError>;
}

/// Why a dynamic dispatch did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The payload is not valid JSON for the handler's type. Retrying won't help.
    #[error("cannot decode {message_type}: {source}")]
    Decode {
        message_type: String,
        #[source]
        source: QueueError,
    },

    #[error("handler failed: {0}")]
    Handler(ReceiverError),
}

#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, envelope: &MessageEnvelope) -> Result<(), DispatchError>;

    fn message_type(&self) -> &str;
}

pub struct TypedHandler<T: Message, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Message, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Message, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, envelope: &MessageEnvelope) -> Result<(), DispatchError> {
        let message: T = envelope
            .payload_as_object()
            .map_err(|source| DispatchError::Decode {
                message_type: T::TYPE.to_string(),
                source,
            })?;
        self.handler
            .handle(message, envelope)
            .await
            .map_err(DispatchError::Handler)
    }

    fn message_type(&self) -> &str {
        T::TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {
        const TYPE: &'static str = "test.ping.v1";
    }

    struct EvenOnly;

    #[async_trait]
    impl Handler<Ping> for EvenOnly {
        async fn handle(&self, message: Ping, _envelope: &MessageEnvelope) -> Result<(), ReceiverError> {
            if message.seq % 2 == 0 {
                Ok(())
            } else {
                Err(format!("odd seq {}", message.seq).into())
            }
        }
    }

    #[tokio::test]
    async fn decodes_and_calls_handler() {
        let handler = TypedHandler::<Ping, _>::new(EvenOnly);
        let env = MessageEnvelope::from_message("t", &Ping { seq: 2 }).unwrap();

        handler.handle_dyn(&env).await.unwrap();
        assert_eq!(handler.message_type(), "test.ping.v1");
    }

    #[tokio::test]
    async fn handler_error_is_reported_as_handler_failure() {
        let handler = TypedHandler::<Ping, _>::new(EvenOnly);
        let env = MessageEnvelope::from_message("t", &Ping { seq: 3 }).unwrap();

        let err = handler.handle_dyn(&env).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
        assert!(err.to_string().contains("odd seq 3"));
    }

    #[tokio::test]
    async fn bad_payload_is_decode_error() {
        let handler = TypedHandler::<Ping, _>::new(EvenOnly);
        let env = MessageEnvelope::new("t", Ping::TYPE, "{\"seq\":\"nope\"}");

        let err = handler.handle_dyn(&env).await.unwrap_err();
        assert!(matches!(err, DispatchError::Decode { .. }));
    }
}
