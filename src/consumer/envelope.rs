use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::ledger::{AckDecision, EnvelopeId, EnvelopeState, Ledger};
use crate::errors::ConsumerError;
use crate::remote::{Attributes, RemoteQueue};

/// A decoded message waiting in the relay queue.
#[derive(Debug)]
pub(crate) struct Envelope<T> {
    pub(crate) id: EnvelopeId,
    pub(crate) message_id: String,
    pub(crate) receipt_handle: String,
    pub(crate) body: T,
    pub(crate) attributes: Attributes,
}

/// What an [`Acker::ack`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First acknowledgment; the delete request was issued.
    Deleted,
    /// The envelope was already acknowledged; nothing was sent.
    AlreadyAcknowledged,
    /// The envelope had been abandoned (explicitly or by shutdown); nothing
    /// was sent and the message will be redelivered.
    Abandoned,
}

/// Acknowledgment handle bound to one delivered envelope.
///
/// Dropping the handle without acknowledging abandons the envelope.
pub struct Acker {
    id: EnvelopeId,
    message_id: String,
    receipt_handle: String,
    queue_url: Arc<str>,
    remote: Arc<dyn RemoteQueue>,
    ledger: Arc<Ledger>,
}

impl Acker {
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    pub fn state(&self) -> EnvelopeState {
        self.ledger
            .state(self.id)
            .unwrap_or(EnvelopeState::Abandoned)
    }

    /// Acknowledges successful processing and deletes the message.
    ///
    /// Only the first call issues a delete request; later calls return
    /// [`AckOutcome::AlreadyAcknowledged`]. A failed delete is returned as
    /// an error but still counts as the one delete for this envelope.
    #[instrument(level = "debug", skip(self), fields(id = %self.id, message_id = %self.message_id))]
    pub async fn ack(&self) -> Result<AckOutcome, ConsumerError> {
        match self.ledger.acknowledge(self.id) {
            AckDecision::Delete => {
                self.remote
                    .delete(&self.queue_url, &self.receipt_handle)
                    .await
                    .map_err(ConsumerError::Delete)?;
                debug!("message deleted");
                Ok(AckOutcome::Deleted)
            }
            AckDecision::AlreadyAcknowledged => Ok(AckOutcome::AlreadyAcknowledged),
            AckDecision::Abandoned => {
                warn!("acknowledgment of an abandoned message ignored");
                Ok(AckOutcome::Abandoned)
            }
        }
    }

    /// Gives up on the message without deleting it. Returns `false` if it
    /// had already reached a terminal state.
    pub fn abandon(&self) -> bool {
        self.ledger.abandon(self.id)
    }
}

impl Drop for Acker {
    fn drop(&mut self) {
        self.ledger.release(self.id);
    }
}

impl fmt::Debug for Acker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acker")
            .field("id", &self.id)
            .field("message_id", &self.message_id)
            .field("queue_url", &self.queue_url)
            .finish_non_exhaustive()
    }
}

/// A message handed to the application: body, attributes and an
/// acknowledgment handle.
#[derive(Debug)]
pub struct Delivery<T> {
    body: T,
    attributes: Attributes,
    acker: Acker,
}

impl<T> Delivery<T> {
    pub(crate) fn new(
        envelope: Envelope<T>,
        queue_url: Arc<str>,
        remote: Arc<dyn RemoteQueue>,
        ledger: Arc<Ledger>,
    ) -> Self {
        let Envelope {
            id,
            message_id,
            receipt_handle,
            body,
            attributes,
        } = envelope;

        Delivery {
            body,
            attributes,
            acker: Acker {
                id,
                message_id,
                receipt_handle,
                queue_url,
                remote,
                ledger,
            },
        }
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn message_id(&self) -> &str {
        self.acker.message_id()
    }

    pub fn id(&self) -> EnvelopeId {
        self.acker.id()
    }

    pub fn state(&self) -> EnvelopeState {
        self.acker.state()
    }

    pub async fn ack(&self) -> Result<AckOutcome, ConsumerError> {
        self.acker.ack().await
    }

    pub fn abandon(&self) -> bool {
        self.acker.abandon()
    }

    /// Splits the delivery into `(body, attributes, ack handle)`.
    pub fn into_parts(self) -> (T, Attributes, Acker) {
        (self.body, self.attributes, self.acker)
    }
}
