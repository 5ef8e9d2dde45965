//! Buffer configuration.
//!
//! Settings are merged from three sources, later ones winning:
//!
//! 1. Library defaults ([`BufferSettings::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `DAQ_BUFFER_`
//!    (e.g. `DAQ_BUFFER_BUCKET_COUNT=32`, `DAQ_BUFFER_CLAIM_TIMEOUT=250ms`)
//!
//! # Example
//!
//! ```toml
//! bucket_size = 8192
//! bucket_count = 32
//! claim_timeout = "500ms"
//! ```

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for buffer settings.
pub const ENV_PREFIX: &str = "DAQ_BUFFER_";

const KEYS: [&str; 4] = ["bucket_size", "bucket_count", "shared", "claim_timeout"];

/// Error types for settings loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Parse error (invalid TOML, wrong types, unknown keys)
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Geometry and contention settings of an
/// [`AcquisitionBuffer`](crate::AcquisitionBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferSettings {
    /// Samples per bucket.
    ///
    /// Default: 4096.
    pub bucket_size: usize,

    /// Number of buckets. Exactly one selects direct (single slot) mode.
    ///
    /// Default: 16.
    pub bucket_count: usize,

    /// Requested buffer mode. Informational only: the bucket count alone
    /// picks the mode, so more than one bucket always runs shared and a single
    /// bucket always runs direct.
    ///
    /// Default: true.
    pub shared: bool,

    /// Longest a save or read waits for a bucket claim. `None` waits
    /// indefinitely.
    ///
    /// Default: none.
    #[serde(with = "humantime_serde")]
    pub claim_timeout: Option<Duration>,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            bucket_size: 4096,
            bucket_count: 16,
            shared: true,
            claim_timeout: None,
        }
    }
}

impl BufferSettings {
    /// Load settings from defaults, the optional TOML file at `path` and the
    /// environment, then validate them.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()).into());
            }
            debug!("Loading buffer settings from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        let settings: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).only(&KEYS))
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .with_context(|| match path {
                Some(path) => format!("Failed to load buffer settings from {}", path.display()),
                None => "Failed to load buffer settings from environment".to_string(),
            })?;

        settings.validate()?;

        info!(
            bucket_size = settings.bucket_size,
            bucket_count = settings.bucket_count,
            claim_timeout = ?settings.claim_timeout,
            "Loaded buffer settings"
        );
        Ok(settings)
    }

    /// Reject geometry that cannot be built.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.bucket_size == 0 {
            return Err(ConfigError::Validation(
                "bucket_size must be greater than 0".to_string(),
            ));
        }
        if self.bucket_count == 0 {
            return Err(ConfigError::Validation(
                "bucket_count must be greater than 0".to_string(),
            ));
        }
        if self.claim_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Validation(
                "claim_timeout must be non-zero; omit it to wait indefinitely".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(format!("{ENV_PREFIX}{}", key.to_uppercase()));
        }
    }

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = BufferSettings::load(None).unwrap();
        assert_eq!(settings, BufferSettings::default());
        assert_eq!(settings.bucket_size, 4096);
        assert_eq!(settings.bucket_count, 16);
        assert!(settings.shared);
        assert!(settings.claim_timeout.is_none());
    }

    #[test]
    #[serial]
    fn test_toml_file_overrides_defaults() {
        clear_env();
        let file = write_toml(
            r#"
bucket_size = 512
bucket_count = 8
claim_timeout = "250ms"
"#,
        );

        let settings = BufferSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.bucket_size, 512);
        assert_eq!(settings.bucket_count, 8);
        assert!(settings.shared);
        assert_eq!(settings.claim_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let file = write_toml("bucket_count = 8\n");
        std::env::set_var("DAQ_BUFFER_BUCKET_COUNT", "32");
        std::env::set_var("DAQ_BUFFER_CLAIM_TIMEOUT", "2s");

        let settings = BufferSettings::load(Some(file.path()));
        clear_env();

        let settings = settings.unwrap();
        assert_eq!(settings.bucket_count, 32);
        assert_eq!(settings.claim_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    #[serial]
    fn test_missing_file() {
        clear_env();
        let err = BufferSettings::load(Some(Path::new("/nonexistent/buffer.toml"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotFound(_))
        ));
    }

    #[test]
    #[serial]
    fn test_unknown_key_rejected() {
        clear_env();
        let file = write_toml("bucket_sise = 8\n");
        let err = BufferSettings::load(Some(file.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Parse(_))
        ));
    }

    #[test]
    #[serial]
    fn test_zero_geometry_rejected() {
        clear_env();
        let file = write_toml("bucket_size = 0\n");
        let err = BufferSettings::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("bucket_size must be greater than 0"));
    }

    #[test]
    fn test_validate_timeout() {
        let settings = BufferSettings {
            claim_timeout: Some(Duration::ZERO),
            ..BufferSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Validation(_))
        ));
    }
}
