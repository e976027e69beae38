use async_trait::async_trait;
use std::future::Future;

use crate::remote::Attributes;

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Trait for implementing asynchronous SQS message handlers.
///
/// Returning `Ok(())` acknowledges the message, which deletes it from the
/// queue. Returning an error leaves it in place so the visibility timeout
/// can re-surface it.
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync {
    /// Processes one message.
    ///
    /// # Arguments
    ///
    /// * `body` - The decoded message body
    /// * `attributes` - System and message attributes delivered with it
    async fn handle(&self, body: T, attributes: Attributes) -> Result<(), HandlerError>;
}

/// [`MessageHandler`] wrapping a closure together with a shared resource.
///
/// The shared resource is cloned for every message, so it is usually an
/// `Arc` or a cheaply clonable handle (database pool, HTTP client, ...).
///
/// # Type Parameters
///
/// * `F` - The message handler function type
/// * `S` - The type of shared resources passed to the handler
pub struct FnHandler<F, S> {
    handler: F,
    shared: S,
}

impl<F, S> FnHandler<F, S> {
    /// Creates a handler from a closure and the resource shared between calls.
    pub fn new(handler: F, shared: S) -> Self {
        FnHandler { handler, shared }
    }
}

#[async_trait]
impl<T, F, Fut, S> MessageHandler<T> for FnHandler<F, S>
where
    T: Send + 'static,
    F: Fn(T, Attributes, S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    async fn handle(&self, body: T, attributes: Attributes) -> Result<(), HandlerError> {
        (self.handler)(body, attributes, self.shared.clone()).await
    }
}

/// Wraps a closure with no shared resource.
pub fn handler_fn<T, F, Fut>(f: F) -> impl MessageHandler<T>
where
    T: Send + 'static,
    F: Fn(T, Attributes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler::new(move |body: T, attributes: Attributes, _: ()| f(body, attributes), ())
}
