use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::{Codec, JsonCodec};
use crate::config::SqsSettings;
use crate::errors::{ConfigError, ConsumerError};
use crate::remote::{FetchRequest, RemoteQueue};

mod backoff;
mod envelope;
mod fetch;
mod handler;
mod ledger;
mod pipeline;
mod relay;

pub use envelope::{AckOutcome, Acker, Delivery};
pub use handler::{FnHandler, HandlerError, MessageHandler, handler_fn};
pub use ledger::{EnvelopeId, EnvelopeState, PipelineStats};
pub use pipeline::{Pipeline, PipelineState, StopHandle};

use pipeline::PipelineConfig;

/// A consumer of an SQS queue.
///
/// Each call to [`consume`](Consumer::consume) creates an independent
/// [`Pipeline`]; [`read`](Consumer::read) and [`run`](Consumer::run) are
/// conveniences on top of it.
pub struct Consumer<C: Codec = JsonCodec> {
    remote: Arc<dyn RemoteQueue>,
    queue_url: Arc<str>,
    settings: SqsSettings,
    codec: Arc<C>,
    current: Option<Pipeline<C>>,
}

impl<C: Codec> Consumer<C> {
    /// Creates a consumer for `settings.inbound_queue_url`.
    ///
    /// # Errors
    ///
    /// Fails if the inbound queue URL is missing or any setting is invalid.
    pub fn new(
        remote: Arc<dyn RemoteQueue>,
        settings: SqsSettings,
        codec: C,
    ) -> Result<Self, ConsumerError> {
        let queue_url = settings
            .inbound_queue_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingQueueUrl(
                "SQS_INBOUND_QUEUE_URL",
                "consumer",
            ))?;
        settings.validate()?;

        Ok(Consumer {
            remote,
            queue_url: Arc::from(queue_url),
            codec: Arc::new(codec),
            settings,
            current: None,
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn settings(&self) -> &SqsSettings {
        &self.settings
    }

    /// Creates a new, idle pipeline. The fetch loop starts on its first
    /// [`next`](Pipeline::next).
    pub fn consume(&self) -> Pipeline<C> {
        Pipeline::new(PipelineConfig {
            remote: Arc::clone(&self.remote),
            queue_url: Arc::clone(&self.queue_url),
            request: FetchRequest {
                max_messages: self.settings.batch_size,
                wait_time_seconds: self.settings.wait_time_seconds,
                visibility_timeout_seconds: self.settings.visibility_timeout_seconds,
                attribute_names: self.settings.attribute_names.clone(),
                message_attribute_names: self.settings.message_attributes.clone(),
            },
            prefetch_limit: self.settings.prefetch_limit,
            retry: self.settings.retry.clone(),
            codec: Arc::clone(&self.codec),
        })
    }

    /// Reads a single message, starting consumption on the first call.
    ///
    /// All reads share one pipeline owned by the consumer.
    pub async fn read(&mut self) -> Result<Delivery<C::Item>, ConsumerError> {
        if self.current.is_none() {
            self.current = Some(self.consume());
        }
        match self.current.as_mut() {
            Some(pipeline) => pipeline.next().await.unwrap_or(Err(ConsumerError::Stopped)),
            None => Err(ConsumerError::Stopped),
        }
    }

    /// The pipeline backing [`read`](Consumer::read), once started.
    pub fn current_pipeline(&self) -> Option<&Pipeline<C>> {
        self.current.as_ref()
    }

    /// Stops the pipeline backing [`read`](Consumer::read).
    pub async fn stop(&mut self) -> Result<(), ConsumerError> {
        match self.current.as_mut() {
            Some(pipeline) => pipeline.stop().await,
            None => Ok(()),
        }
    }

    /// Feeds every message to `handler` until the pipeline stops.
    ///
    /// Messages are acknowledged when the handler succeeds. Handler errors
    /// are logged and the message is left for redelivery. Returns only on
    /// a fatal fetch failure.
    pub async fn run<H>(&self, handler: H) -> Result<(), ConsumerError>
    where
        H: MessageHandler<C::Item>,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Like [`run`](Consumer::run), but stops cleanly once `shutdown`
    /// completes.
    pub async fn run_until<H, S>(&self, handler: H, shutdown: S) -> Result<(), ConsumerError>
    where
        H: MessageHandler<C::Item>,
        S: Future<Output = ()>,
    {
        let mut pipeline = self.consume();
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    return pipeline.stop().await;
                }
                next = pipeline.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            };

            let (body, attributes, acker) = delivery.into_parts();
            match handler.handle(body, attributes).await {
                Ok(()) => {
                    if let Err(e) = acker.ack().await {
                        warn!(message_id = acker.message_id(), error = %e, "error deleting message");
                    }
                }
                Err(e) => {
                    warn!(message_id = acker.message_id(), error = %e, "error handling message");
                    acker.abandon();
                }
            }
        }
    }
}

impl<C: Codec> std::fmt::Debug for Consumer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("queue_url", &self.queue_url)
            .field("settings", &self.settings)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
