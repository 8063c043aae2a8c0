//! Expiration policies and the directives they resolve to.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::config::CacheConfig;

/// How long an entry lives and what happens when it leaves the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ExpirationPolicy {
    /// Expires after the configured long-term lifetime.
    LongTerm,
    /// Expires after the configured short-term lifetime.
    ShortTerm,
    /// Never expires.
    #[default]
    Never,
    /// Long-term lifetime, rebuilt in the background after expiry.
    LongTermAutoReset,
    /// Short-term lifetime, rebuilt in the background after expiry.
    ShortTermAutoReset,
}

/// Store-level expiration instruction derived from a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationDirective {
    /// Keep the entry until it is explicitly removed.
    Never,
    /// Drop the entry `ttl` after it is written. When `auto_reset` is set the
    /// eviction hook enqueues the key for a background rebuild.
    Absolute { ttl: Duration, auto_reset: bool },
}

impl ExpirationPolicy {
    pub const ALL: [ExpirationPolicy; 5] = [
        ExpirationPolicy::LongTerm,
        ExpirationPolicy::ShortTerm,
        ExpirationPolicy::Never,
        ExpirationPolicy::LongTermAutoReset,
        ExpirationPolicy::ShortTermAutoReset,
    ];

    /// Map the policy onto a concrete directive using the configured lifetimes.
    pub fn resolve(self, config: &CacheConfig) -> ExpirationDirective {
        match self {
            Self::LongTerm => ExpirationDirective::Absolute {
                ttl: config.long_term_ttl,
                auto_reset: false,
            },
            Self::ShortTerm => ExpirationDirective::Absolute {
                ttl: config.short_term_ttl,
                auto_reset: false,
            },
            Self::Never => ExpirationDirective::Never,
            Self::LongTermAutoReset => ExpirationDirective::Absolute {
                ttl: config.long_term_ttl,
                auto_reset: true,
            },
            Self::ShortTermAutoReset => ExpirationDirective::Absolute {
                ttl: config.short_term_ttl,
                auto_reset: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongTerm => "long_term",
            Self::ShortTerm => "short_term",
            Self::Never => "never",
            Self::LongTermAutoReset => "long_term_auto_reset",
            Self::ShortTermAutoReset => "short_term_auto_reset",
        }
    }

    pub fn is_auto_reset(self) -> bool {
        matches!(self, Self::LongTermAutoReset | Self::ShortTermAutoReset)
    }
}

impl ExpirationDirective {
    /// Lifetime measured from the moment the entry is written.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Absolute { ttl, .. } => Some(*ttl),
        }
    }

    pub fn auto_reset(&self) -> bool {
        matches!(
            self,
            Self::Absolute {
                auto_reset: true,
                ..
            }
        )
    }
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown expiration policy `{0}`")]
pub struct ParsePolicyError(pub String);

impl FromStr for ExpirationPolicy {
    type Err = ParsePolicyError;

    /// Accepts the snake_case tags produced by [`ExpirationPolicy::as_str`] as
    /// well as their PascalCase spelling.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "longterm" => Ok(Self::LongTerm),
            "shortterm" => Ok(Self::ShortTerm),
            "never" => Ok(Self::Never),
            "longtermautoreset" => Ok(Self::LongTermAutoReset),
            "shorttermautoreset" => Ok(Self::ShortTermAutoReset),
            _ => Err(ParsePolicyError(value.to_string())),
        }
    }
}

impl TryFrom<String> for ExpirationPolicy {
    type Error = ParsePolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
