//! Configuration types for mediameta

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata provider configuration (endpoints, credentials, concurrency)
///
/// Groups settings for the two external providers and the shared outbound
/// request gate. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the primary (community catalog) provider
    #[serde(default = "default_cinemeta_base_url")]
    pub cinemeta_base_url: String,

    /// Base URL of the secondary (TMDb) provider API
    #[serde(default = "default_tmdb_base_url")]
    pub tmdb_base_url: String,

    /// Base URL for TMDb-hosted image assets
    #[serde(default = "default_tmdb_image_base_url")]
    pub tmdb_image_base_url: String,

    /// Base URL for derived primary-provider artwork
    #[serde(default = "default_metahub_base_url")]
    pub metahub_base_url: String,

    /// TMDb API key (required — validation fails without it)
    #[serde(default)]
    pub tmdb_api_key: String,

    /// Preferred metadata language passed to TMDb (default: "en-US")
    #[serde(default = "default_language")]
    pub language: String,

    /// Release region passed to TMDb movie searches (default: "US")
    #[serde(default = "default_region")]
    pub region: String,

    /// Transport-level timeout for each provider request (default: 15 seconds)
    ///
    /// This is the only timeout in the system; a hung provider call is capped
    /// by it and holds its gate slot until it resolves or times out.
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum concurrent outbound provider calls across both providers (default: 12)
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cinemeta_base_url: default_cinemeta_base_url(),
            tmdb_base_url: default_tmdb_base_url(),
            tmdb_image_base_url: default_tmdb_image_base_url(),
            metahub_base_url: default_metahub_base_url(),
            tmdb_api_key: String::new(),
            language: default_language(),
            region: default_region(),
            request_timeout: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// Batch reconciliation configuration
///
/// Groups settings for the record-store reconciliation passes.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum concurrent reconciliation work units (default: 20)
    ///
    /// Records are pulled from the store cursor in chunks of twice this value
    /// and episode resolutions run in waves of exactly this value.
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Interval between progress event emissions (default: 2 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: default_max_concurrent_units(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Main configuration for mediameta
///
/// Fields are organized into logical sub-configs:
/// - [`providers`](ProviderConfig) — endpoints, credentials, request gate
/// - [`reconcile`](ReconcileConfig) — batch reconciliation tuning
///
/// Sub-config fields are flattened for serialization, so the JSON/TOML
/// format stays un-nested.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider endpoints, credentials, and outbound concurrency
    #[serde(flatten)]
    pub providers: ProviderConfig,

    /// Batch reconciliation settings
    #[serde(flatten)]
    pub reconcile: ReconcileConfig,
}

impl Config {
    /// Validate the configuration, returning the first problem found.
    ///
    /// A missing TMDb API key would leave the secondary provider unable to
    /// answer anything, so it is rejected up front rather than at lookup time.
    pub fn validate(&self) -> Result<()> {
        if self.providers.tmdb_api_key.trim().is_empty() {
            return Err(Error::config("TMDb API key is required", "tmdb_api_key"));
        }
        if self.providers.max_concurrent_requests == 0 {
            return Err(Error::config(
                "max_concurrent_requests must be at least 1",
                "max_concurrent_requests",
            ));
        }
        if self.reconcile.max_concurrent_units == 0 {
            return Err(Error::config(
                "max_concurrent_units must be at least 1",
                "max_concurrent_units",
            ));
        }
        Ok(())
    }
}

fn default_cinemeta_base_url() -> String {
    "https://v3-cinemeta.strem.io".to_string()
}

fn default_tmdb_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_tmdb_image_base_url() -> String {
    "https://image.tmdb.org/t/p".to_string()
}

fn default_metahub_base_url() -> String {
    "https://images.metahub.space".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_region() -> String {
    "US".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_concurrent_requests() -> usize {
    12
}

fn default_max_concurrent_units() -> usize {
    20
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(2)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
