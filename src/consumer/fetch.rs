use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use super::backoff::Backoff;
use super::envelope::Envelope;
use super::ledger::Ledger;
use super::relay::RelaySender;
use crate::codec::Codec;
use crate::config::RetryPolicy;
use crate::errors::ConsumerError;
use crate::remote::{FetchRequest, RawMessage, RemoteQueue};

/// Background task that keeps the relay queue topped up.
pub(crate) struct FetchLoop<C: Codec> {
    pub(crate) remote: Arc<dyn RemoteQueue>,
    pub(crate) queue_url: Arc<str>,
    /// Template for every fetch; `max_messages` holds the configured batch size.
    pub(crate) request: FetchRequest,
    pub(crate) retry: RetryPolicy,
    pub(crate) codec: Arc<C>,
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) relay: RelaySender<Envelope<C::Item>>,
    pub(crate) cancel: CancellationToken,
}

impl<C: Codec> FetchLoop<C> {
    /// Runs until cancelled, until the relay is closed, or until a fatal
    /// error. Only the last case returns `Err`.
    #[instrument(name = "fetch_loop", skip_all, fields(queue_url = %self.queue_url))]
    pub(crate) async fn run(self) -> Result<(), ConsumerError> {
        let mut backoff = Backoff::new(self.retry.clone());

        while !self.cancel.is_cancelled() {
            let free = match self.relay.free_slots() {
                Some(0) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        ready = self.relay.wait_for_capacity() => {
                            if ready.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
                free => free,
            };

            let request = self.next_request(free);
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = self.remote.fetch_batch(&self.queue_url, &request) => fetched,
            };

            let messages = match fetched {
                Ok(messages) => {
                    backoff.reset();
                    messages
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, attempt = backoff.attempt(), ?delay, "transient fetch failure, retrying");
                    if !self.pause(delay).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "fatal fetch failure, stopping fetch loop");
                    return Err(ConsumerError::Fetch(e));
                }
            };

            if messages.is_empty() {
                debug!("no messages received");
                continue;
            }
            debug!(count = messages.len(), "received batch");

            let envelopes = self.decode_batch(messages)?;
            if !self.push_all(envelopes).await {
                break;
            }
        }

        debug!("fetch loop exiting");
        Ok(())
    }

    fn next_request(&self, free: Option<usize>) -> FetchRequest {
        let batch_size = self.request.max_messages;
        let max_messages = match free {
            Some(free) => batch_size.min(i32::try_from(free).unwrap_or(i32::MAX)),
            None => batch_size,
        };
        FetchRequest {
            max_messages,
            ..self.request.clone()
        }
    }

    /// Decodes every body before anything is registered, so a bad body
    /// leaves no half-pushed batch behind.
    fn decode_batch(
        &self,
        messages: Vec<RawMessage>,
    ) -> Result<Vec<Envelope<C::Item>>, ConsumerError> {
        let mut decoded = Vec::with_capacity(messages.len());
        for message in messages {
            let body = self.codec.decode(&message.body).map_err(|source| {
                error!(message_id = %message.message_id, error = %source, "undecodable message body");
                ConsumerError::Decode {
                    message_id: message.message_id.clone(),
                    source,
                }
            })?;
            decoded.push((message, body));
        }

        Ok(decoded
            .into_iter()
            .map(|(message, body)| Envelope {
                id: self.ledger.register(),
                message_id: message.message_id,
                receipt_handle: message.receipt_handle,
                body,
                attributes: message.attributes,
            })
            .collect())
    }

    /// Pushes in order, waiting whenever the relay is full. Returns `false`
    /// if cancelled or the relay closed; envelopes left unpushed are
    /// abandoned.
    async fn push_all(&self, envelopes: Vec<Envelope<C::Item>>) -> bool {
        let mut pending = envelopes.into_iter();
        while let Some(envelope) = pending.next() {
            let id = envelope.id;
            let pushed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                pushed = self.relay.push(envelope) => pushed.is_ok(),
            };
            if !pushed {
                self.ledger.release(id);
                for rest in pending {
                    self.ledger.release(rest.id);
                }
                return false;
            }
        }
        true
    }

    /// Sleeps between retries. Returns `false` if cancelled meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
