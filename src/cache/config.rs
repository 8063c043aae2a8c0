//! Cache configuration.
//!
//! Controls expiration lifetimes and the background reconciliation loop.

use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_SHORT_TERM_EXPIRY_MINUTES: u64 = 1;
const DEFAULT_LONG_TERM_EXPIRY_MINUTES: u64 = 60;
const DEFAULT_BACKGROUND_WAIT_MS: u64 = 1000;

/// Engine configuration.
///
/// Lifetimes are held as [`Duration`]s; the host settings layer converts the
/// configured minute values with [`CacheConfig::from_minutes`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of `ShortTerm` and `ShortTermAutoReset` entries.
    #[serde(rename = "short_term_expiry_minutes", with = "minutes")]
    pub short_term_ttl: Duration,
    /// Lifetime of `LongTerm` and `LongTermAutoReset` entries.
    #[serde(rename = "long_term_expiry_minutes", with = "minutes")]
    pub long_term_ttl: Duration,
    /// Idle time between reconciliation passes.
    #[serde(rename = "background_wait_ms", with = "millis")]
    pub background_wait: Duration,
    /// Run the background reconciliation loop.
    pub use_background_loop: bool,
    /// Optional entry bound handed to the underlying store.
    pub max_capacity: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_minutes(
            DEFAULT_SHORT_TERM_EXPIRY_MINUTES,
            DEFAULT_LONG_TERM_EXPIRY_MINUTES,
        )
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            background_wait: settings.background_wait,
            use_background_loop: settings.use_background_loop,
            max_capacity: settings.max_capacity,
            ..Self::from_minutes(
                settings.short_term_expiry_minutes.get(),
                settings.long_term_expiry_minutes.get(),
            )
        }
    }
}

impl CacheConfig {
    /// Build a configuration from minute-granular lifetimes, leaving the
    /// remaining fields at their defaults.
    pub fn from_minutes(short_term_minutes: u64, long_term_minutes: u64) -> Self {
        Self {
            short_term_ttl: Duration::from_secs(short_term_minutes.saturating_mul(60)),
            long_term_ttl: Duration::from_secs(long_term_minutes.saturating_mul(60)),
            background_wait: Duration::from_millis(DEFAULT_BACKGROUND_WAIT_MS),
            use_background_loop: false,
            max_capacity: None,
        }
    }

    /// Returns the background wait, clamped to at least one millisecond so the
    /// loop never spins.
    pub fn background_wait_non_zero(&self) -> Duration {
        self.background_wait.max(Duration::from_millis(1))
    }
}

mod minutes {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let minutes = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(minutes.saturating_mul(60)))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
