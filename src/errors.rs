use thiserror::Error;

/// Top-level error type for the SQS pipeline.
///
/// Every error produced by this crate converts into `AwsSqsError`, so
/// applications that don't care about the finer distinctions can use it
/// as their single error type.
#[derive(Debug, Error)]
pub enum AwsSqsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error(transparent)]
    Producer(#[from] ProducerError),
}

/// Failure reported by a [`RemoteQueue`](crate::remote::RemoteQueue) primitive.
///
/// The distinction between the two variants drives the fetch loop: transient
/// failures are retried, fatal failures stop the pipeline.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Timeouts, throttling, temporary network failure.
    #[error("transient failure during {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    /// Authentication failure, malformed response, permanent misconfiguration.
    #[error("fatal failure during {operation}: {message}")]
    Fatal {
        operation: &'static str,
        message: String,
    },
}

impl RemoteError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        RemoteError::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn fatal(operation: &'static str, message: impl Into<String>) -> Self {
        RemoteError::Fatal {
            operation,
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }

    pub fn operation(&self) -> &'static str {
        match self {
            RemoteError::Transient { operation, .. } | RemoteError::Fatal { operation, .. } => {
                operation
            }
        }
    }
}

/// Error raised while turning a message body into a value or back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode message body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message body: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Invalid pipeline settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be defined to create a {1}")]
    MissingQueueUrl(&'static str, &'static str),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Errors surfaced by the consuming side of the pipeline.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The fetch loop hit a non-retryable failure and the pipeline stopped.
    #[error("fetch loop stopped: {0}")]
    Fetch(#[source] RemoteError),

    /// A fetched body could not be decoded; the pipeline stopped.
    #[error("message {message_id} could not be decoded: {source}")]
    Decode {
        message_id: String,
        #[source]
        source: CodecError,
    },

    /// The fetch loop task panicked or was aborted.
    #[error("fetch loop task failed: {0}")]
    TaskFailed(String),

    /// The pipeline has stopped and will yield no more messages.
    #[error("consumer pipeline is stopped")]
    Stopped,

    /// The delete request issued by an acknowledgment failed.
    #[error("failed to delete acknowledged message: {0}")]
    Delete(#[source] RemoteError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors surfaced by [`Producer`](crate::producer::Producer).
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to send message: {0}")]
    Send(#[source] RemoteError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
