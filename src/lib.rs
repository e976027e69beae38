//! # AWS SQS Pipeline
//!
//! An asynchronous bridge between application message handlers and AWS SQS.
//!
//! ## Features
//!
//! - Background fetch loop with long polling and configurable batch size
//! - Bounded prefetch buffer with backpressure (or unbounded, if configured)
//! - Lazy, pull-based consumption: one delivery at a time, with an explicit
//!   `ack()` that deletes the message exactly once
//! - Un-acknowledged messages are left for redelivery by the visibility timeout
//! - Transient SQS errors retried with a configurable backoff; fatal errors
//!   stop the pipeline and are returned to the caller
//! - Trait- and closure-based handlers with shared resource support
//! - A matching producer for the outbound queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rs_sqs_pipeline::consumer::{HandlerError, handler_fn};
//! use rs_sqs_pipeline::remote::Attributes;
//! use rs_sqs_pipeline::{Sqs, SqsSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SqsSettings::default()
//!         .with_inbound_queue_url("https://sqs.region.amazonaws.com/account/queue-name")
//!         .with_prefetch_limit(20);
//!     let sqs = Sqs::new(settings)?;
//!     let consumer = sqs.consumer().await?;
//!
//!     consumer
//!         .run(handler_fn(|message: serde_json::Value, _attributes: Attributes| async move {
//!             println!("Processing message: {message}");
//!             Ok::<(), HandlerError>(())
//!         }))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod producer;
pub mod remote;
mod sqs;

pub use codec::{Codec, JsonCodec, RawCodec};
pub use config::{RetryPolicy, SqsSettings};
pub use consumer::{AckOutcome, Consumer, Delivery, Pipeline, PipelineState};
pub use errors::AwsSqsError;
pub use producer::Producer;
pub use sqs::Sqs;
