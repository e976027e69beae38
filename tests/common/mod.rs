#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rs_sqs_pipeline::errors::RemoteError;
use rs_sqs_pipeline::remote::{
    Attributes, FetchRequest, OutgoingMessage, RawMessage, RemoteQueue, SendReceipt,
};
use rs_sqs_pipeline::{RetryPolicy, SqsSettings};

pub const QUEUE_URL: &str = "https://sqs.us-east-1.amazonaws.com/000000000000/inbound";
pub const OUTBOUND_URL: &str = "https://sqs.us-east-1.amazonaws.com/000000000000/outbound";

/// What the next fetch call returns.
#[derive(Debug, Clone)]
pub enum Scripted {
    Batch(Vec<RawMessage>),
    Fail(RemoteError),
    /// Never completes.
    Hang,
}

#[derive(Default)]
struct Recorded {
    fetches: Vec<FetchRequest>,
    deletes: Vec<String>,
    sends: Vec<(String, OutgoingMessage)>,
}

/// In-memory remote queue replaying a fixed script of fetch results.
///
/// Once the script runs out every fetch behaves like an empty long poll:
/// it sleeps for the requested wait time (at least a second) and returns
/// nothing.
pub struct MockQueue {
    script: Mutex<VecDeque<Scripted>>,
    recorded: Mutex<Recorded>,
    delete_error: Mutex<Option<RemoteError>>,
}

impl MockQueue {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        Arc::new(MockQueue {
            script: Mutex::new(script.into_iter().collect()),
            recorded: Mutex::new(Recorded::default()),
            delete_error: Mutex::new(None),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new([])
    }

    pub fn fail_deletes_with(&self, error: RemoteError) {
        *self.delete_error.lock().unwrap() = Some(error);
    }

    pub fn fetch_calls(&self) -> usize {
        self.recorded.lock().unwrap().fetches.len()
    }

    pub fn fetch_requests(&self) -> Vec<FetchRequest> {
        self.recorded.lock().unwrap().fetches.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.recorded.lock().unwrap().deletes.clone()
    }

    pub fn sends(&self) -> Vec<(String, OutgoingMessage)> {
        self.recorded.lock().unwrap().sends.clone()
    }
}

#[async_trait]
impl RemoteQueue for MockQueue {
    async fn fetch_batch(
        &self,
        _queue_url: &str,
        request: &FetchRequest,
    ) -> Result<Vec<RawMessage>, RemoteError> {
        self.recorded.lock().unwrap().fetches.push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Batch(messages)) => Ok(messages),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Hang) => std::future::pending().await,
            None => {
                let wait = request.wait_time_seconds.max(1) as u64;
                tokio::time::sleep(Duration::from_secs(wait)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete(&self, _queue_url: &str, receipt_handle: &str) -> Result<(), RemoteError> {
        self.recorded
            .lock()
            .unwrap()
            .deletes
            .push(receipt_handle.to_string());
        match self.delete_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send(
        &self,
        queue_url: &str,
        message: OutgoingMessage,
    ) -> Result<SendReceipt, RemoteError> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.sends.push((queue_url.to_string(), message));
        Ok(SendReceipt {
            message_id: Some(format!("sent-{}", recorded.sends.len())),
        })
    }
}

/// A message whose JSON body is `{"n": n}` and whose receipt is `receipt-n`.
pub fn message(n: usize) -> RawMessage {
    raw_message(n, format!(r#"{{"n":{n}}}"#))
}

pub fn raw_message(n: usize, body: impl Into<String>) -> RawMessage {
    RawMessage {
        message_id: format!("message-{n}"),
        receipt_handle: format!("receipt-{n}"),
        body: body.into(),
        attributes: Attributes::default(),
    }
}

pub fn batch(range: std::ops::Range<usize>) -> Scripted {
    Scripted::Batch(range.map(message).collect())
}

pub fn settings(prefetch_limit: usize) -> SqsSettings {
    SqsSettings::default()
        .with_inbound_queue_url(QUEUE_URL)
        .with_outbound_queue_url(OUTBOUND_URL)
        .with_prefetch_limit(prefetch_limit)
        .with_retry(RetryPolicy::constant(Duration::from_millis(50)))
}

/// Polls `condition` until it holds, failing the test after ten seconds
/// of (virtual) time.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
