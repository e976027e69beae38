use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::client::create_sqs_client;
use crate::codec::{Codec, JsonCodec};
use crate::config::SqsSettings;
use crate::consumer::Consumer;
use crate::errors::{ConfigError, ConsumerError, ProducerError};
use crate::producer::Producer;
use crate::remote::{RemoteQueue, SqsRemoteQueue};

/// Entry point holding the settings and a lazily created SQS client.
///
/// The client is built on first use and shared by every consumer and
/// producer handed out afterwards.
///
/// ```rust,no_run
/// use rs_sqs_pipeline::{Sqs, SqsSettings};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let sqs = Sqs::new(SqsSettings::from_env()?)?;
///     let mut consumer = sqs.consumer().await?;
///
///     let delivery = consumer.read().await?;
///     println!("received {}", delivery.body());
///     delivery.ack().await?;
///     Ok(())
/// }
/// ```
pub struct Sqs {
    settings: SqsSettings,
    remote: OnceCell<Arc<dyn RemoteQueue>>,
}

impl Sqs {
    pub fn new(settings: SqsSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Sqs {
            settings,
            remote: OnceCell::new(),
        })
    }

    /// Uses `remote` instead of building an SQS client.
    pub fn with_remote(
        settings: SqsSettings,
        remote: Arc<dyn RemoteQueue>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Sqs {
            settings,
            remote: OnceCell::new_with(Some(remote)),
        })
    }

    pub fn settings(&self) -> &SqsSettings {
        &self.settings
    }

    /// The shared remote queue client, created on first call.
    pub async fn remote(&self) -> Arc<dyn RemoteQueue> {
        let remote = self
            .remote
            .get_or_init(|| async {
                let client = create_sqs_client(&self.settings).await;
                Arc::new(SqsRemoteQueue::new(client)) as Arc<dyn RemoteQueue>
            })
            .await;
        Arc::clone(remote)
    }

    /// A new consumer decoding JSON bodies.
    pub async fn consumer(&self) -> Result<Consumer<JsonCodec>, ConsumerError> {
        self.consumer_with_codec(JsonCodec::new()).await
    }

    pub async fn consumer_with_codec<C: Codec>(
        &self,
        codec: C,
    ) -> Result<Consumer<C>, ConsumerError> {
        Consumer::new(self.remote().await, self.settings.clone(), codec)
    }

    /// A new producer encoding JSON bodies.
    pub async fn producer(&self) -> Result<Producer<JsonCodec>, ProducerError> {
        self.producer_with_codec(JsonCodec::new()).await
    }

    pub async fn producer_with_codec<C: Codec>(
        &self,
        codec: C,
    ) -> Result<Producer<C>, ProducerError> {
        Producer::new(self.remote().await, &self.settings, codec)
    }
}

impl std::fmt::Debug for Sqs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sqs")
            .field("settings", &self.settings)
            .field("client_initialized", &self.remote.initialized())
            .finish()
    }
}
