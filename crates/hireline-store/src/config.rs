//! Sync layer configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use hireline_api::{RestClient, WsChannel};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::ConfigError;

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 600;
const MIN_TTL_SECS: u64 = 1;
const MAX_TTL_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Per-kind cache lifetimes. Kinds without an override use
/// [`EntityKind::default_ttl`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// Overrides in seconds, keyed by singular kind name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<EntityKind, u64>,
}

impl TtlPolicy {
    pub fn ttl(&self, kind: EntityKind) -> Duration {
        self.overrides
            .get(&kind)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| kind.default_ttl())
    }

    pub fn set(&mut self, kind: EntityKind, ttl: Duration) {
        self.overrides.insert(kind, ttl.as_secs());
    }
}

/// Connection and cache settings for a set of stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the pull API, without the version segment.
    pub api_url: String,

    /// Version path segment, e.g. `v1`.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// WebSocket URL of the realtime provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_url: Option<String>,

    /// Bearer token for both backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Total timeout for a single pull request.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub ttl: TtlPolicy,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl SyncConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_version: default_api_version(),
            realtime_url: None,
            token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            ttl: TtlPolicy::default(),
        }
    }

    #[must_use]
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    #[must_use]
    pub fn realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn ttl(mut self, kind: EntityKind, ttl: Duration) -> Self {
        self.ttl.set(kind, ttl);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Missing { field: "api_url" });
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Scheme {
                field: "api_url",
                expected: "http:// or https://",
                value: self.api_url.clone(),
            });
        }
        if self.api_version.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "api_version",
            });
        }
        if let Some(url) = &self.realtime_url
            && !(url.starts_with("ws://") || url.starts_with("wss://"))
        {
            return Err(ConfigError::Scheme {
                field: "realtime_url",
                expected: "ws:// or wss://",
                value: url.clone(),
            });
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.request_timeout_secs) {
            return Err(ConfigError::OutOfRange {
                field: "request_timeout_secs",
                min: MIN_TIMEOUT_SECS,
                max: MAX_TIMEOUT_SECS,
                value: self.request_timeout_secs,
            });
        }
        for secs in self.ttl.overrides.values() {
            if !(MIN_TTL_SECS..=MAX_TTL_SECS).contains(secs) {
                return Err(ConfigError::OutOfRange {
                    field: "ttl",
                    min: MIN_TTL_SECS,
                    max: MAX_TTL_SECS,
                    value: *secs,
                });
            }
        }
        Ok(())
    }

    /// Build the pull client described by this configuration.
    pub fn rest_client(&self) -> Result<RestClient, ConfigError> {
        self.validate()?;
        let client = RestClient::with_timeout(
            self.api_url.clone(),
            self.api_version.clone(),
            Duration::from_secs(self.request_timeout_secs),
        )?;
        Ok(match &self.token {
            Some(token) => client.with_token(token.clone()),
            None => client,
        })
    }

    /// Build the realtime channel, if a realtime URL is configured.
    pub fn realtime_channel(&self) -> Option<WsChannel> {
        let url = self.realtime_url.as_ref()?;
        let channel = WsChannel::new(url.clone());
        Some(match &self.token {
            Some(token) => channel.with_token(token.clone()),
            None => channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new("https://api.example.com");
        assert!(config.validate().is_ok());
        assert_eq!(config.api_version, "v1");
        assert_eq!(config.ttl.ttl(EntityKind::Job), Duration::from_secs(300));
    }

    #[test]
    fn test_ttl_override() {
        let config = SyncConfig::new("https://api.example.com").ttl(EntityKind::Job, Duration::from_secs(10));
        assert_eq!(config.ttl.ttl(EntityKind::Job), Duration::from_secs(10));
        assert_eq!(config.ttl.ttl(EntityKind::Client), Duration::from_secs(300));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"api_url": "https://api.example.com", "ttl": {"overrides": {"message": 5}}}"#,
        )
        .unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.ttl.ttl(EntityKind::Message), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_failures() {
        assert!(matches!(
            SyncConfig::new("").validate(),
            Err(ConfigError::Missing { field: "api_url" })
        ));
        assert!(matches!(
            SyncConfig::new("ftp://x").validate(),
            Err(ConfigError::Scheme { field: "api_url", .. })
        ));
        assert!(matches!(
            SyncConfig::new("https://x").realtime_url("https://x").validate(),
            Err(ConfigError::Scheme { field: "realtime_url", .. })
        ));
        assert!(matches!(
            SyncConfig::new("https://x").request_timeout_secs(0).validate(),
            Err(ConfigError::OutOfRange { field: "request_timeout_secs", .. })
        ));
        assert!(matches!(
            SyncConfig::new("https://x").ttl(EntityKind::Job, Duration::ZERO).validate(),
            Err(ConfigError::OutOfRange { field: "ttl", .. })
        ));
    }

    #[test]
    fn test_builds_clients() {
        let config = SyncConfig::new("https://api.example.com/")
            .realtime_url("wss://rt.example.com")
            .token("secret");
        assert!(config.rest_client().is_ok());
        assert_eq!(config.realtime_channel().unwrap().url(), "wss://rt.example.com");
        assert!(SyncConfig::new("https://x").realtime_channel().is_none());
    }
}
