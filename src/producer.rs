use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::codec::{Codec, JsonCodec};
use crate::config::{MAX_DELAY_SECONDS, SqsSettings};
use crate::errors::{ConfigError, ProducerError};
use crate::remote::{AttributeValue, OutgoingMessage, RemoteQueue, SendReceipt};

/// A producer that writes to `settings.outbound_queue_url`.
///
/// Stateless: every call is forwarded straight to the remote queue with no
/// buffering and no retries beyond the client's own.
pub struct Producer<C: Codec = JsonCodec> {
    remote: Arc<dyn RemoteQueue>,
    queue_url: String,
    codec: C,
}

impl<C: Codec> Producer<C> {
    pub fn new(
        remote: Arc<dyn RemoteQueue>,
        settings: &SqsSettings,
        codec: C,
    ) -> Result<Self, ProducerError> {
        let queue_url = settings
            .outbound_queue_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingQueueUrl(
                "SQS_OUTBOUND_QUEUE_URL",
                "producer",
            ))?;

        Ok(Producer {
            remote,
            queue_url: queue_url.to_string(),
            codec,
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Sends one message.
    pub async fn send(
        &self,
        body: &C::Item,
        attributes: HashMap<String, AttributeValue>,
    ) -> Result<SendReceipt, ProducerError> {
        self.send_with_delay(body, Duration::ZERO, attributes).await
    }

    /// Sends one message that becomes visible after `delay` (at most 15 minutes).
    #[instrument(level = "debug", skip(self, body, attributes), fields(queue_url = %self.queue_url))]
    pub async fn send_with_delay(
        &self,
        body: &C::Item,
        delay: Duration,
        attributes: HashMap<String, AttributeValue>,
    ) -> Result<SendReceipt, ProducerError> {
        if delay.as_secs() > MAX_DELAY_SECONDS {
            return Err(ConfigError::InvalidValue {
                name: "delay",
                reason: format!("{delay:?} exceeds {MAX_DELAY_SECONDS} seconds"),
            }
            .into());
        }

        let message = OutgoingMessage {
            body: self.codec.encode(body)?,
            delay,
            attributes,
        };

        let receipt = self
            .remote
            .send(&self.queue_url, message)
            .await
            .map_err(ProducerError::Send)?;
        debug!(message_id = ?receipt.message_id, "message sent");
        Ok(receipt)
    }
}

impl<C: Codec> std::fmt::Debug for Producer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("queue_url", &self.queue_url)
            .finish_non_exhaustive()
    }
}
