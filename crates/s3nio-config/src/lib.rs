//! Configuration-knob resolution for the s3nio filesystem core.
//!
//! This crate resolves the small, fixed set of typed knobs the core needs
//! (read-ahead fragment sizing, endpoint protocol, region/credentials
//! fallback, integrity algorithm, discovery timeout). It is deliberately
//! *not* a general CLI or config-file loader: bulk configuration loading and
//! flag parsing live above this core and are out of scope here.
//!
//! Resolution order (highest precedence first), per the knob table:
//! explicit overrides > environment variables > built-in defaults.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheme used for non-AWS (custom-endpoint) S3-compatible services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProtocol {
    Http,
    Https,
}
impl Default for EndpointProtocol {
    fn default() -> Self {
        Self::Https
    }
}

/// Checksum algorithm attached to uploads via the `integrity-check` open option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntegrityAlgorithm {
    Crc32,
    Crc32c,
    Crc64nvme,
}

/// Resolved configuration for the s3nio core.
///
/// Field names match the snake_case suffix of their `S3_SPI_*` / `AWS_*`
/// environment variable (after the prefix is stripped), so that plain
/// [`Env::prefixed`] providers map onto them without a custom key mapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3NioConfig {
    /// `s3.spi.read.max-fragment-size` / `S3_SPI_READ_MAX_FRAGMENT_SIZE`.
    pub read_max_fragment_size: u64,
    /// `s3.spi.read.max-fragment-number` / `S3_SPI_READ_MAX_FRAGMENT_NUMBER`.
    pub read_max_fragment_number: usize,
    /// `s3.spi.endpoint-protocol` / `S3_SPI_ENDPOINT_PROTOCOL`.
    pub endpoint_protocol: EndpointProtocol,
    /// `aws.region`, falls back through the standard `AWS_REGION` chain.
    pub region: Option<String>,
    /// `aws.accessKey`, falls back through `AWS_ACCESS_KEY_ID`.
    pub access_key_id: Option<String>,
    /// `aws.secretAccessKey`, falls back through `AWS_SECRET_ACCESS_KEY`.
    pub secret_access_key: Option<String>,
    /// Upload checksum algorithm; `None` means disabled (the default).
    pub integrity_algorithm: Option<IntegrityAlgorithm>,
    /// Discovery/metadata operation timeout, in minutes (`timeout-low`).
    #[serde(with = "minutes")]
    pub timeout_low: Duration,
}
impl Default for S3NioConfig {
    fn default() -> Self {
        Self {
            read_max_fragment_size: 5 * 1024 * 1024,
            read_max_fragment_number: 50,
            endpoint_protocol: EndpointProtocol::default(),
            region: None,
            access_key_id: None,
            secret_access_key: None,
            integrity_algorithm: None,
            timeout_low: Duration::from_secs(60),
        }
    }
}

mod minutes {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs() / 60)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let minutes = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(minutes * 60))
    }
}

/// Builds an [`S3NioConfig`] by layering an explicit, caller-supplied
/// override on top of environment variables on top of built-in defaults.
///
/// # Examples
///
/// ```
/// use s3nio_config::ConfigBuilder;
///
/// let config = ConfigBuilder::new().set("region", "eu-west-1").build().unwrap();
/// assert_eq!(config.region.as_deref(), Some("eu-west-1"));
/// assert_eq!(config.read_max_fragment_number, 50); // untouched default
/// ```
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    overrides: Vec<(&'static str, figment::value::Value)>,
}
impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an explicit override for one field, taking precedence over
    /// both environment variables and defaults.
    pub fn set(mut self, key: &'static str, value: impl Into<figment::value::Value>) -> Self {
        self.overrides.push((key, value.into()));
        self
    }

    /// Resolve the final configuration, applying the precedence order:
    /// explicit overrides > `S3_SPI_*`/`AWS_*` environment > built-in defaults.
    pub fn build(self) -> Result<S3NioConfig> {
        // `S3_SPI_READ_MAX_FRAGMENT_SIZE` -> "read_max_fragment_size",
        // `S3_SPI_ENDPOINT_PROTOCOL` -> "endpoint_protocol": the stripped,
        // lowercased suffix already matches our field names, so a single
        // prefixed provider covers both knobs.
        let mut figment = Figment::from(Serialized::defaults(S3NioConfig::default())).merge(Env::prefixed("S3_SPI_"));
        // The standard AWS_* variables don't share a common field-name
        // suffix with ours, so each gets an exact-match provider that
        // renames its (empty, since the whole name is the prefix) key.
        figment = figment
            .merge(Env::prefixed("AWS_REGION").map(|_| "region".into()))
            .merge(Env::prefixed("AWS_ACCESS_KEY_ID").map(|_| "access_key_id".into()))
            .merge(Env::prefixed("AWS_SECRET_ACCESS_KEY").map(|_| "secret_access_key".into()));
        for (key, value) in self.overrides {
            figment = figment.merge((key, value));
        }
        figment.extract().or_raise(|| ErrorKind::Invalid("failed to resolve s3nio configuration".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.read_max_fragment_size, 5 * 1024 * 1024);
        assert_eq!(config.read_max_fragment_number, 50);
        assert_eq!(config.endpoint_protocol, EndpointProtocol::Https);
        assert!(config.region.is_none());
        assert!(config.integrity_algorithm.is_none());
        assert_eq!(config.timeout_low, Duration::from_secs(60));
    }

    #[test]
    fn explicit_override_wins_over_default() {
        let config = ConfigBuilder::new().set("read_max_fragment_number", 10).build().unwrap();
        assert_eq!(config.read_max_fragment_number, 10);
    }

    #[test]
    fn explicit_override_sets_region() {
        let config = ConfigBuilder::new().set("region", "us-west-004").build().unwrap();
        assert_eq!(config.region.as_deref(), Some("us-west-004"));
    }
}
