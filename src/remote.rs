//! The three SQS primitives the pipeline is built on, behind a trait so
//! the fetch loop can be driven by the real service or by a test double.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::primitives::Blob;
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use futures::FutureExt as _;
use tracing::{instrument, warn};

use crate::errors::RemoteError;

/// Service error codes that clear up on their own.
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "RequestThrottled",
    "RequestLimitExceeded",
    "OverLimit",
    "KmsThrottled",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    "RequestTimeout",
];

/// A single SQS message attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    /// `String`, `Number`, `Binary`, optionally with a custom suffix.
    pub data_type: String,
    pub string_value: Option<String>,
    pub binary_value: Option<Vec<u8>>,
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        AttributeValue {
            data_type: "String".to_string(),
            string_value: Some(value.into()),
            binary_value: None,
        }
    }

    pub fn number(value: impl ToString) -> Self {
        AttributeValue {
            data_type: "Number".to_string(),
            string_value: Some(value.to_string()),
            binary_value: None,
        }
    }

    pub fn binary(value: impl Into<Vec<u8>>) -> Self {
        AttributeValue {
            data_type: "Binary".to_string(),
            string_value: None,
            binary_value: Some(value.into()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.string_value.as_deref()
    }
}

/// Metadata delivered alongside a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// System attributes such as `ApproximateReceiveCount` or `SentTimestamp`.
    pub system: HashMap<String, String>,
    /// User-defined message attributes.
    pub message: HashMap<String, AttributeValue>,
}

impl Attributes {
    pub fn system(&self, name: &str) -> Option<&str> {
        self.system.get(name).map(String::as_str)
    }

    pub fn message(&self, name: &str) -> Option<&AttributeValue> {
        self.message.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.message.is_empty()
    }
}

/// A message exactly as returned by a fetch, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    /// Token identifying this delivery; needed to delete it.
    pub receipt_handle: String,
    pub body: String,
    pub attributes: Attributes,
}

/// Parameters of one fetch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout_seconds: i32,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

/// A message to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: String,
    pub delay: Duration,
    pub attributes: HashMap<String, AttributeValue>,
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

/// The remote queue primitives the pipeline depends on.
///
/// Implementations must be safe to call concurrently: the fetch loop,
/// acknowledgments and the producer all share one instance.
#[async_trait]
pub trait RemoteQueue: Send + Sync {
    /// Fetches up to `request.max_messages` messages, waiting at most
    /// `request.wait_time_seconds` for any to arrive. An empty result is
    /// not an error.
    async fn fetch_batch(
        &self,
        queue_url: &str,
        request: &FetchRequest,
    ) -> Result<Vec<RawMessage>, RemoteError>;

    /// Deletes the delivery identified by `receipt_handle`.
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), RemoteError>;

    /// Sends a single message.
    async fn send(
        &self,
        queue_url: &str,
        message: OutgoingMessage,
    ) -> Result<SendReceipt, RemoteError>;
}

/// [`RemoteQueue`] backed by the AWS SDK client.
#[derive(Debug, Clone)]
pub struct SqsRemoteQueue {
    client: aws_sdk_sqs::Client,
}

impl SqsRemoteQueue {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        SqsRemoteQueue { client }
    }

    pub fn client(&self) -> &aws_sdk_sqs::Client {
        &self.client
    }
}

impl From<aws_sdk_sqs::Client> for SqsRemoteQueue {
    fn from(client: aws_sdk_sqs::Client) -> Self {
        SqsRemoteQueue::new(client)
    }
}

#[async_trait]
impl RemoteQueue for SqsRemoteQueue {
    #[instrument(level = "debug", skip(self, request), fields(max = request.max_messages))]
    async fn fetch_batch(
        &self,
        queue_url: &str,
        request: &FetchRequest,
    ) -> Result<Vec<RawMessage>, RemoteError> {
        let system_names = request
            .attribute_names
            .iter()
            .map(|name| MessageSystemAttributeName::from(name.as_str()))
            .collect::<Vec<_>>();

        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(request.max_messages)
            .wait_time_seconds(request.wait_time_seconds)
            .visibility_timeout(request.visibility_timeout_seconds)
            .set_message_system_attribute_names(Some(system_names))
            .set_message_attribute_names(Some(request.message_attribute_names.clone()))
            .send()
            // Segment the async state machine; the SDK send future is large.
            .boxed()
            .await
            .map_err(|e| classify("receive_message", e))?;

        let mut messages = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(message_id = ?message.message_id(), "received a message with no receipt handle");
                continue;
            };
            let Some(body) = message.body() else {
                warn!(message_id = ?message.message_id(), "received a message with no body");
                continue;
            };

            let system = message
                .attributes()
                .map(|attrs| {
                    attrs
                        .iter()
                        .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                        .collect()
                })
                .unwrap_or_default();

            let user = message
                .message_attributes()
                .map(|attrs| {
                    attrs
                        .iter()
                        .map(|(name, value)| (name.clone(), from_sdk_attribute(value)))
                        .collect()
                })
                .unwrap_or_default();

            messages.push(RawMessage {
                message_id: message.message_id().unwrap_or_default().to_string(),
                receipt_handle: receipt_handle.to_string(),
                body: body.to_string(),
                attributes: Attributes {
                    system,
                    message: user,
                },
            });
        }

        Ok(messages)
    }

    #[instrument(level = "debug", skip(self, receipt_handle))]
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), RemoteError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .boxed()
            .await
            .map_err(|e| classify("delete_message", e))?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, message), fields(size = message.body.len()))]
    async fn send(
        &self,
        queue_url: &str,
        message: OutgoingMessage,
    ) -> Result<SendReceipt, RemoteError> {
        let delay_seconds = i32::try_from(message.delay.as_secs())
            .map_err(|e| RemoteError::fatal("send_message", format!("delay too large: {e}")))?;

        let mut attributes = HashMap::with_capacity(message.attributes.len());
        for (name, value) in message.attributes {
            let value = to_sdk_attribute(value)
                .map_err(|e| RemoteError::fatal("send_message", format!("attribute {name}: {e}")))?;
            attributes.insert(name, value);
        }

        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(message.body)
            .delay_seconds(delay_seconds)
            .set_message_attributes((!attributes.is_empty()).then_some(attributes))
            .send()
            .boxed()
            .await
            .map_err(|e| classify("send_message", e))?;

        Ok(SendReceipt {
            message_id: output.message_id().map(str::to_string),
        })
    }
}

fn from_sdk_attribute(value: &MessageAttributeValue) -> AttributeValue {
    AttributeValue {
        data_type: value.data_type().to_string(),
        string_value: value.string_value().map(str::to_string),
        binary_value: value.binary_value().map(|blob| blob.as_ref().to_vec()),
    }
}

fn to_sdk_attribute(
    value: AttributeValue,
) -> Result<MessageAttributeValue, aws_sdk_sqs::error::BuildError> {
    MessageAttributeValue::builder()
        .data_type(value.data_type)
        .set_string_value(value.string_value)
        .set_binary_value(value.binary_value.map(Blob::new))
        .build()
}

/// Maps an SDK failure onto the transient/fatal split.
fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        SdkError::ServiceError(context) => context
            .err()
            .code()
            .is_some_and(|code| TRANSIENT_ERROR_CODES.contains(&code)),
        _ => false,
    };

    let message = DisplayErrorContext(&err).to_string();
    if transient {
        RemoteError::transient(operation, message)
    } else {
        RemoteError::fatal(operation, message)
    }
}
