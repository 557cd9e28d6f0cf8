//! Handler registry.
//!
//! A handler performs the real side effect for one task type. The registry
//! holds exactly one handler per [`TaskType`](actionq_core::TaskType) and
//! dispatches with an exhaustive match, so adding a task type without wiring
//! a handler does not compile.
//!
//! Handlers may run more than once for the same task (a crash between success
//! and delete replays it). They must make their effects idempotent, e.g. by
//! upserting on a caller-generated id.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use actionq_core::{
    ContextKind, HandlerError, KickUserContext, SaveUserConfigContext, SendMessageContext,
    TaskContext,
};

/// Performs the effect of a task with payload `C`.
#[async_trait]
pub trait TaskHandler<C>: Send + Sync
where
    C: Send + 'static,
{
    async fn handle(&self, context: C) -> Result<(), HandlerError>;
}

#[async_trait]
impl<C, H> TaskHandler<C> for Arc<H>
where
    C: Send + 'static,
    H: TaskHandler<C> + ?Sized,
{
    async fn handle(&self, context: C) -> Result<(), HandlerError> {
        (**self).handle(context).await
    }
}

/// Handler for a task type this build intentionally does not support.
///
/// Every dispatch fails with [`HandlerError::NoHandler`], which fails the task
/// terminally without consuming retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

#[async_trait]
impl<C> TaskHandler<C> for Unsupported
where
    C: ContextKind + Send + 'static,
{
    async fn handle(&self, _context: C) -> Result<(), HandlerError> {
        Err(HandlerError::NoHandler(C::TASK_TYPE))
    }
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<C, F> {
    f: F,
    _context: PhantomData<fn(C)>,
}

/// Wrap `f` as a handler.
///
/// ```ignore
/// let h = handler_fn(|ctx: SendMessageContext| async move {
///     client.send(&ctx).await.map_err(HandlerError::msg)
/// });
/// ```
pub fn handler_fn<C, F, Fut>(f: F) -> FnHandler<C, F>
where
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler {
        f,
        _context: PhantomData,
    }
}

#[async_trait]
impl<C, F, Fut> TaskHandler<C> for FnHandler<C, F>
where
    C: Send + 'static,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, context: C) -> Result<(), HandlerError> {
        (self.f)(context).await
    }
}

/// One handler per task type.
#[derive(Clone)]
pub struct HandlerRegistry {
    send_message: Arc<dyn TaskHandler<SendMessageContext>>,
    save_user_config: Arc<dyn TaskHandler<SaveUserConfigContext>>,
    kick_user: Arc<dyn TaskHandler<KickUserContext>>,
}

impl HandlerRegistry {
    pub fn new<S, U, K>(send_message: S, save_user_config: U, kick_user: K) -> Self
    where
        S: TaskHandler<SendMessageContext> + 'static,
        U: TaskHandler<SaveUserConfigContext> + 'static,
        K: TaskHandler<KickUserContext> + 'static,
    {
        Self {
            send_message: Arc::new(send_message),
            save_user_config: Arc::new(save_user_config),
            kick_user: Arc::new(kick_user),
        }
    }

    /// Route `context` to the handler for its task type.
    pub async fn dispatch(&self, context: TaskContext) -> Result<(), HandlerError> {
        match context {
            TaskContext::SendMessage(ctx) => self.send_message.handle(ctx).await,
            TaskContext::SaveUserConfig(ctx) => self.save_user_config.handle(ctx).await,
            TaskContext::KickUser(ctx) => self.kick_user.handle(ctx).await,
        }
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}
