//! Self-healing cache.
//!
//! Entries are created through [`HealingCache::get_or_create`] together with
//! metadata describing how to rebuild them: a [`Builder`], an
//! [`ExpirationPolicy`] and the keys that depend on them. That metadata makes
//! three kinds of recovery possible:
//!
//! - **Cascade reset**: [`HealingCache::reset`] rebuilds a key and, depth
//!   first, every key it names as related.
//! - **Auto-reset**: entries written under an auto-reset policy are queued for
//!   rebuild when the store evicts them, and the [`Reconciler`] rebuilds them
//!   in the background.
//! - **Entity-change invalidation**: [`HealingCache::on_entities_changed`]
//!   queues every key whose `"<EntityType>:"` prefix names a changed type.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! short_term_expiry_minutes = 1
//! long_term_expiry_minutes = 60
//! background_wait_ms = 1000
//! use_background_loop = false
//! ```

mod builder;
mod config;
mod engine;
mod error;
mod invalidator;
mod lock;
mod policy;
mod queue;
mod reconciler;
mod registry;
mod store;

pub use builder::{BuildFuture, Builder};
pub use config::CacheConfig;
pub use engine::{HealingCache, ResetOutcome};
pub use error::{BuildError, CacheError};
pub use invalidator::{ChangeSet, entity_type_of};
pub use policy::{ExpirationDirective, ExpirationPolicy, ParsePolicyError};
pub use queue::ResetQueue;
pub use reconciler::{DrainSummary, Reconciler, ReconcilerHandle};
pub use registry::{EntryMeta, EntryRegistry};
