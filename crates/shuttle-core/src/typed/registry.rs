//! TypedRegistry - typed handlers keyed by message type, usable as a
//! `MessageReceiver`.
//!
//! Settlement after dispatch:
//! - handler succeeded -> `complete`
//! - handler failed -> `abandon` (redelivered; the failure is returned so the
//!   dispatch loop logs it)
//! - no handler, or payload not decodable -> `move_to_dead_letter`
//!
//! Queues that do not support abandon / dead-letter are respected: the
//! envelope is then left to its lock timeout, or completed for poison messages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::handler::{DispatchError, DynHandler, Handler, TypedHandler};
use super::message::Message;
use crate::domain::{Context, MessageEnvelope, QueueError};
use crate::ports::{MessageQueue, MessageReceiver, ReceiverError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for message type '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Message, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let message_type = T::TYPE.to_string();
        if self.handlers.contains_key(&message_type) {
            return Err(RegistryError::AlreadyRegistered(message_type));
        }
        self.handlers
            .insert(message_type, Arc::new(TypedHandler::<T, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(message_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

async fn discard_poison(
    queue: &dyn MessageQueue,
    ctx: &Context,
    envelope: &mut MessageEnvelope,
) -> Result<(), QueueError> {
    if queue.capabilities().can_dead_letter() {
        queue.move_to_dead_letter(ctx, envelope).await
    } else {
        queue.complete(ctx, envelope).await
    }
}

#[async_trait]
impl MessageReceiver for TypedRegistry {
    async fn receive_message(
        &self,
        mut envelope: MessageEnvelope,
        queue: Arc<dyn MessageQueue>,
    ) -> Result<(), ReceiverError> {
        let ctx = Context::new(envelope.trace_id());

        let Some(handler) = self.get(envelope.message_type()) else {
            warn!(
                queue = queue.name(),
                trace_id = envelope.trace_id(),
                message_type = envelope.message_type(),
                "no handler registered, discarding message {envelope}"
            );
            discard_poison(queue.as_ref(), &ctx, &mut envelope).await?;
            return Ok(());
        };

        match handler.handle_dyn(&envelope).await {
            Ok(()) => {
                queue.complete(&ctx, &mut envelope).await?;
                Ok(())
            }
            Err(DispatchError::Decode { message_type, source }) => {
                warn!(
                    queue = queue.name(),
                    trace_id = envelope.trace_id(),
                    message_type = %message_type,
                    error = %source,
                    "undecodable payload, discarding message"
                );
                discard_poison(queue.as_ref(), &ctx, &mut envelope).await?;
                Ok(())
            }
            Err(DispatchError::Handler(e)) => {
                if queue.capabilities().can_abandon() {
                    queue.abandon(&ctx, &mut envelope).await?;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap as Map;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Created {
        value: i32,
    }

    impl Message for Created {
        const TYPE: &'static str = "test.created.v1";
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Renamed {
        name: String,
        family: Map<String, String>,
    }

    impl Message for Renamed {
        const TYPE: &'static str = "test.renamed.v1";
    }

    struct Noop;

    #[async_trait]
    impl Handler<Created> for Noop {
        async fn handle(&self, _message: Created, _envelope: &MessageEnvelope) -> Result<(), ReceiverError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<Renamed> for Noop {
        async fn handle(&self, _message: Renamed, _envelope: &MessageEnvelope) -> Result<(), ReceiverError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = TypedRegistry::new();
        registry.register::<Created, _>(Noop).unwrap();

        let handler = registry.get(Created::TYPE).unwrap();
        assert_eq!(handler.message_type(), Created::TYPE);
        assert!(registry.get(Renamed::TYPE).is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = TypedRegistry::new();
        registry.register::<Created, _>(Noop).unwrap();

        let result = registry.register::<Created, _>(Noop);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t == Created::TYPE));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = TypedRegistry::new();
        registry.register::<Renamed, _>(Noop).unwrap();
        registry.register::<Created, _>(Noop).unwrap();

        assert_eq!(
            registry.registered_types(),
            vec![Created::TYPE.to_string(), Renamed::TYPE.to_string()]
        );
    }
}
