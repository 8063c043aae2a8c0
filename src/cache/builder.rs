//! Rebuild functions.
//!
//! A [`Builder`] is the one abstraction for both blocking and asynchronous
//! value producers: it maps an execution context to a boxed future. Blocking
//! producers hand back a future that is already resolved.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};

use super::error::BuildError;

pub type BuildFuture<V> = BoxFuture<'static, Result<V, BuildError>>;

type BuildFn<V, C> = dyn Fn(C) -> BuildFuture<V> + Send + Sync;

/// Shared, immutable rebuild function for a cache entry.
pub struct Builder<V, C> {
    build: Arc<BuildFn<V, C>>,
}

impl<V, C> Builder<V, C>
where
    V: Send + 'static,
    C: Send + 'static,
{
    /// Wrap an asynchronous producer.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, BuildError>> + Send + 'static,
    {
        Self {
            build: Arc::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Wrap a blocking producer. It runs on the task that triggered the build.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(C) -> Result<V, BuildError> + Send + Sync + 'static,
    {
        Self::new(move |ctx| future::ready(f(ctx)))
    }

    /// Bind a typed parameter value that is handed to `f` on every rebuild.
    pub fn with_params<P, F, Fut>(params: P, f: F) -> Self
    where
        P: Clone + Send + Sync + 'static,
        F: Fn(C, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, BuildError>> + Send + 'static,
    {
        Self::new(move |ctx| f(ctx, params.clone()))
    }

    /// Run the producer. A panic inside it, including one raised while a
    /// blocking producer runs, resolves to a [`BuildError`].
    pub(crate) fn build(&self, ctx: C) -> BuildFuture<V> {
        let build = Arc::clone(&self.build);
        AssertUnwindSafe(async move { build(ctx).await })
            .catch_unwind()
            .map(|result| {
                result.unwrap_or_else(|panic| {
                    Err(BuildError::new(format!(
                        "builder panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                })
            })
            .boxed()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl<V, C> Clone for Builder<V, C> {
    fn clone(&self) -> Self {
        Self {
            build: Arc::clone(&self.build),
        }
    }
}

impl<V, C> fmt::Debug for Builder<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder").finish_non_exhaustive()
    }
}
