//! Client builder pattern

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::Client;

/// Client settings, loadable from a config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host; nothing can connect until this is set
    pub host: Option<String>,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    /// Liveness polling period; `None` disables polling
    pub poll_interval_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: indi_core::DEFAULT_PORT,
            connect_timeout_ms: 1000,
            probe_timeout_ms: 1000,
            poll_interval_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    /// `host:port`, once a host is configured
    pub fn address(&self) -> Option<String> {
        self.host
            .as_ref()
            .map(|host| format!("{}:{}", host, self.port))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match &self.host {
            Some(host) if host.trim().is_empty() => {
                Err(ClientError::InvalidEndpoint("empty host".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Builder for [`Client`]
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded config
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set server host
    pub fn host(mut self, host: &str) -> Self {
        self.config.host = Some(host.to_string());
        self
    }

    /// Set server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Bound on establishing the server connection
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Bound on each liveness probe
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable liveness polling with the given period
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Build without connecting
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        Ok(Client::with_config(self.config))
    }

    /// Build, connect, and start liveness polling if configured
    pub async fn connect(self) -> Result<Client> {
        let client = self.build()?;
        client.connect().await?;
        if let Some(interval) = client.config().poll_interval() {
            client.start_liveness_polling(interval);
        }
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 7624);
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), Duration::from_secs(1));
        assert!(config.poll_interval().is_none());
        assert!(config.address().is_none());
    }

    #[test]
    fn test_builder_sets_endpoint() {
        let client = ClientBuilder::new()
            .host("observatory.local")
            .port(7625)
            .connect_timeout(Duration::from_millis(250))
            .build()
            .expect("build failed");
        assert_eq!(client.host().as_deref(), Some("observatory.local"));
        assert_eq!(client.port(), 7625);
        assert_eq!(client.config().connect_timeout_ms, 250);
    }

    #[test]
    fn test_builder_rejects_empty_host() {
        let result = ClientBuilder::new().host("  ").build();
        assert!(matches!(result, Err(ClientError::InvalidEndpoint(_))));
    }
}
