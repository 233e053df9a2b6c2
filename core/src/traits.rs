//! Callback traits implemented by the embedding application
//!
//! The engine never issues requests itself. Everything a virtual user does,
//! including its start and stop hooks, goes through [`UserAction`].

use crate::context::UserContext;
use crate::error::ActionResult;
use async_trait::async_trait;
use futures::future::BoxFuture;

// ============================================================================
// Action callback
// ============================================================================

/// One unit of simulated work
///
/// Implementations typically hold shared, heavy resources (an HTTP client,
/// a connection pool) and keep per-user state in the context's session.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use swarm_bench_core::{ActionResult, UserAction, UserContext};
///
/// struct Ping;
///
/// #[async_trait]
/// impl UserAction<u32> for Ping {
///     async fn call(&self, ctx: &mut UserContext<u32>) -> ActionResult {
///         ctx.session += 1;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait UserAction<S>: Send + Sync {
    /// Perform the work once for the given user
    async fn call(&self, ctx: &mut UserContext<S>) -> ActionResult;
}

/// Adapter turning a closure into a [`UserAction`], see [`action_fn`]
pub struct FnAction<F> {
    f: F,
}

/// Wrap a closure returning a boxed future as a [`UserAction`]
///
/// ```
/// use swarm_bench_core::{action_fn, UserContext};
///
/// let bump = action_fn(|ctx: &mut UserContext<u32>| {
///     Box::pin(async move {
///         ctx.session += 1;
///         Ok(())
///     })
/// });
/// # let _ = bump;
/// ```
pub fn action_fn<S, F>(f: F) -> FnAction<F>
where
    S: Send,
    F: for<'a> Fn(&'a mut UserContext<S>) -> BoxFuture<'a, ActionResult> + Send + Sync,
{
    FnAction { f }
}

#[async_trait]
impl<S, F> UserAction<S> for FnAction<F>
where
    S: Send,
    F: for<'a> Fn(&'a mut UserContext<S>) -> BoxFuture<'a, ActionResult> + Send + Sync,
{
    async fn call(&self, ctx: &mut UserContext<S>) -> ActionResult {
        (self.f)(ctx).await
    }
}
