//! Executor erasure.
//!
//! Any `Fn(HandlerContext) -> impl Future` whose output is `()` or
//! `Result<(), E>` can be used as a handler body:
//!
//! ```rust,ignore
//! async fn echo(ctx: HandlerContext) -> Result<(), SendError> {
//!     ctx.reply(ctx.event().text().to_string()).await
//! }
//!
//! let handler = on_message().handle(echo)?;
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::HandlerContext;
use crate::error::BoxError;

/// Values an executor may return.
pub trait IntoHandlerResult: Send {
    /// Converts into the uniform executor result.
    fn into_handler_result(self) -> Result<(), BoxError>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<BoxError> + Send,
{
    fn into_handler_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// A type-erased handler body.
pub trait Executor: Send + Sync {
    /// Runs the body for one invocation.
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut> Executor for F
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, Result<(), BoxError>> {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// A shared, type-erased handler body.
pub type BoxedExecutor = Arc<dyn Executor>;

/// Erases an executor.
pub fn into_executor<F>(f: F) -> BoxedExecutor
where
    F: Executor + 'static,
{
    Arc::new(f)
}
