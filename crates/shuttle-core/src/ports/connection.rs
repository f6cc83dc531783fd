//! Connection resolution port.
//!
//! The queue only needs "a resolved connection, or a configuration error"
//! from the configuration layer. Parsing and reference resolution live
//! outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Context, QueueError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialParams {
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub uri: Option<String>,
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub credential: Option<CredentialParams>,
}

impl ConnectionParams {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// A connection needs either a uri or a host.
    pub fn validate(&self, trace_id: &str) -> Result<(), QueueError> {
        let has_uri = self.uri.as_deref().is_some_and(|uri| !uri.is_empty());
        let has_host = self.host.as_deref().is_some_and(|host| !host.is_empty());
        if !has_uri && !has_host {
            return Err(QueueError::configuration(
                trace_id,
                "connection uri or host is not set",
            ));
        }
        if let Some(port) = self.port {
            if port == 0 {
                return Err(QueueError::configuration(trace_id, "connection port is invalid"));
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// `Ok(None)` when no connection is configured.
    async fn resolve(&self, ctx: &Context) -> Result<Option<ConnectionParams>, QueueError>;
}

/// Resolver over parameters that were already loaded (e.g. from `QueueConfig`).
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionResolver {
    connection: Option<ConnectionParams>,
}

impl StaticConnectionResolver {
    pub fn new(connection: Option<ConnectionParams>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConnectionResolver for StaticConnectionResolver {
    async fn resolve(&self, ctx: &Context) -> Result<Option<ConnectionParams>, QueueError> {
        match &self.connection {
            Some(connection) => {
                connection.validate(ctx.trace_id())?;
                Ok(Some(connection.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    #[tokio::test]
    async fn resolves_valid_uri() {
        let resolver =
            StaticConnectionResolver::new(Some(ConnectionParams::from_uri("memory://local")));
        let resolved = resolver.resolve(&Context::new("t-1")).await.unwrap();
        assert_eq!(resolved.unwrap().uri.as_deref(), Some("memory://local"));
    }

    #[tokio::test]
    async fn empty_connection_is_configuration_error() {
        let resolver = StaticConnectionResolver::new(Some(ConnectionParams::default()));
        let err = resolver.resolve(&Context::new("t-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.trace_id(), "t-1");
    }

    #[tokio::test]
    async fn missing_connection_resolves_to_none() {
        let resolver = StaticConnectionResolver::default();
        assert!(resolver.resolve(&Context::background()).await.unwrap().is_none());
    }

    #[test]
    fn zero_port_is_rejected() {
        let params = ConnectionParams {
            host: Some("localhost".to_string()),
            port: Some(0),
            ..ConnectionParams::default()
        };
        assert!(params.validate("").is_err());
    }
}
