//! Cache error types.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure reported by a [`Builder`](super::Builder).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BuildError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl BuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it reachable through `source()`.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The builder for `key` failed; nothing was stored. Every caller that was
    /// waiting on the same build observes the same shared error.
    #[error("failed to build cache entry `{key}`: {source}")]
    Build {
        key: String,
        #[source]
        source: Arc<BuildError>,
    },
}

impl CacheError {
    pub fn build(key: impl Into<String>, source: Arc<BuildError>) -> Self {
        Self::Build {
            key: key.into(),
            source,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Build { key, .. } => key,
        }
    }
}
