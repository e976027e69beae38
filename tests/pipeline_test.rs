mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockQueue, Scripted, batch, eventually, message, raw_message, settings};
use rs_sqs_pipeline::consumer::{EnvelopeState, HandlerError, handler_fn};
use rs_sqs_pipeline::errors::{ConfigError, ConsumerError, RemoteError};
use rs_sqs_pipeline::remote::Attributes;
use rs_sqs_pipeline::{AckOutcome, Consumer, JsonCodec, PipelineState, RetryPolicy};
use serde_json::Value;

fn consumer(remote: &Arc<MockQueue>, prefetch_limit: usize) -> Consumer<JsonCodec> {
    Consumer::new(remote.clone(), settings(prefetch_limit), JsonCodec::new())
        .expect("valid consumer settings")
}

fn n(body: &Value) -> u64 {
    body["n"].as_u64().expect("numeric n")
}

#[tokio::test(start_paused = true)]
async fn deliveries_follow_batch_order() {
    let remote = MockQueue::new([batch(0..3), batch(3..7)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    let mut seen = Vec::new();
    for _ in 0..7 {
        let delivery = pipeline.next().await.unwrap().unwrap();
        seen.push(n(delivery.body()));
        delivery.ack().await.unwrap();
    }

    assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(remote.deletes().len(), 7);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn double_ack_deletes_once() {
    let remote = MockQueue::new([batch(0..1)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    let delivery = pipeline.next().await.unwrap().unwrap();
    assert_eq!(delivery.ack().await.unwrap(), AckOutcome::Deleted);
    assert_eq!(delivery.ack().await.unwrap(), AckOutcome::AlreadyAcknowledged);
    assert_eq!(delivery.state(), EnvelopeState::Acknowledged);

    assert_eq!(remote.deletes(), vec!["receipt-0".to_string()]);
    assert_eq!(pipeline.stats().acknowledged, 1);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_delete_still_counts_as_the_one_delete() {
    let remote = MockQueue::new([batch(0..1)]);
    remote.fail_deletes_with(RemoteError::fatal("DeleteMessage", "ReceiptHandleIsInvalid"));
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    let delivery = pipeline.next().await.unwrap().unwrap();
    assert!(matches!(
        delivery.ack().await,
        Err(ConsumerError::Delete(_))
    ));
    assert_eq!(delivery.ack().await.unwrap(), AckOutcome::AlreadyAcknowledged);
    assert_eq!(remote.deletes().len(), 1);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn bounded_relay_holds_at_most_prefetch_limit() {
    // One batch of ten against room for five: five are buffered, the loop
    // blocks on the sixth.
    let remote = MockQueue::new([batch(0..10)]);
    let consumer = consumer(&remote, 5);
    let mut pipeline = consumer.consume();
    pipeline.start();

    eventually(|| pipeline.buffered() == 5).await;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pipeline.buffered() <= 5);
    }
    assert_eq!(pipeline.buffered(), 5);
    assert_eq!(pipeline.stats().fetched, 10);
    assert_eq!(remote.fetch_requests()[0].max_messages, 5);

    let first = pipeline.next().await.unwrap().unwrap();
    assert_eq!(n(first.body()), 0);
    // Draining one slot lets the sixth push complete.
    eventually(|| pipeline.buffered() == 5).await;

    let mut rest = Vec::new();
    for _ in 0..9 {
        let delivery = pipeline.next().await.unwrap().unwrap();
        rest.push(n(delivery.body()));
        assert!(pipeline.buffered() <= 5);
    }
    assert_eq!(rest, (1..10).collect::<Vec<_>>());
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn full_relay_is_not_refetched() {
    let remote = MockQueue::new([batch(0..5), batch(5..10)]);
    let consumer = consumer(&remote, 5);
    let mut pipeline = consumer.consume();
    pipeline.start();

    eventually(|| pipeline.buffered() == 5).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(remote.fetch_calls(), 1);

    let delivery = pipeline.next().await.unwrap().unwrap();
    drop(delivery);
    eventually(|| remote.fetch_calls() == 2).await;
    // Only one slot was free when the second fetch was issued.
    assert_eq!(remote.fetch_requests()[1].max_messages, 1);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unbounded_relay_accepts_everything() {
    let remote = MockQueue::new([batch(0..10), batch(10..20), batch(20..50)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();
    pipeline.start();

    eventually(|| pipeline.buffered() == 50).await;
    assert!(remote.fetch_requests().iter().all(|r| r.max_messages == 10));
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_deliveries_are_not_deleted_on_stop() {
    let remote = MockQueue::new([batch(0..4)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    let first = pipeline.next().await.unwrap().unwrap();
    let second = pipeline.next().await.unwrap().unwrap();
    first.ack().await.unwrap();

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(second.state(), EnvelopeState::Abandoned);
    assert_eq!(second.ack().await.unwrap(), AckOutcome::Abandoned);

    assert_eq!(remote.deletes(), vec!["receipt-0".to_string()]);
    let stats = pipeline.stats();
    assert_eq!(stats.acknowledged, 1);
    // The second delivery plus the two still buffered.
    assert_eq!(stats.abandoned, 3);
}

#[tokio::test(start_paused = true)]
async fn dropped_or_abandoned_deliveries_are_never_deleted() {
    let remote = MockQueue::new([batch(0..2)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    let dropped = pipeline.next().await.unwrap().unwrap();
    drop(dropped);

    let abandoned = pipeline.next().await.unwrap().unwrap();
    assert!(abandoned.abandon());
    assert!(!abandoned.abandon());
    assert_eq!(abandoned.ack().await.unwrap(), AckOutcome::Abandoned);

    assert!(remote.deletes().is_empty());
    assert_eq!(pipeline.stats().abandoned, 2);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fatal_fetch_error_reaches_the_consumer() {
    let remote = MockQueue::new([Scripted::Fail(RemoteError::fatal(
        "ReceiveMessage",
        "AWS.SimpleQueueService.NonExistentQueue",
    ))]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    match pipeline.next().await {
        Some(Err(ConsumerError::Fetch(e))) => assert!(!e.is_transient()),
        other => panic!("expected a fetch error, got {other:?}"),
    }
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.next().await.is_none());
    assert!(pipeline.stop().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn fatal_error_after_a_batch_ends_the_sequence() {
    let remote = MockQueue::new([
        batch(0..3),
        Scripted::Fail(RemoteError::fatal("ReceiveMessage", "AccessDenied")),
    ]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    let mut errors = 0;
    while let Some(item) = pipeline.next().await {
        match item {
            Ok(delivery) => {
                delivery.ack().await.unwrap();
            }
            Err(ConsumerError::Fetch(_)) => errors += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(errors, 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(remote.fetch_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_errors_are_retried() {
    let remote = MockQueue::new([
        Scripted::Fail(RemoteError::transient("ReceiveMessage", "ThrottlingException")),
        Scripted::Fail(RemoteError::transient("ReceiveMessage", "dispatch failure")),
        batch(0..1),
    ]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    let delivery = pipeline.next().await.unwrap().unwrap();
    assert_eq!(n(delivery.body()), 0);
    assert!(remote.fetch_calls() >= 3);
    assert_eq!(pipeline.state(), PipelineState::Running);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn immediate_retry_policy_does_not_wait() {
    let remote = MockQueue::new([
        Scripted::Fail(RemoteError::transient("ReceiveMessage", "ServiceUnavailable")),
        batch(0..1),
    ]);
    let settings = settings(0).with_retry(RetryPolicy::immediate());
    let consumer = Consumer::new(remote.clone(), settings, JsonCodec::<Value>::new()).unwrap();
    let mut pipeline = consumer.consume();

    let started = tokio::time::Instant::now();
    let delivery = pipeline.next().await.unwrap().unwrap();
    assert_eq!(n(delivery.body()), 0);
    assert!(started.elapsed() < RetryPolicy::default().initial_delay);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_while_fetch_is_suspended() {
    let remote = MockQueue::new([Scripted::Hang]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();
    let mut states = pipeline.watch_state();
    pipeline.start();
    assert_eq!(*states.borrow_and_update(), PipelineState::Running);

    eventually(|| remote.fetch_calls() == 1).await;
    pipeline.stop().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(states.has_changed().unwrap());
    assert_eq!(pipeline.buffered(), 0);
    assert_eq!(pipeline.stats().fetched, 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(remote.fetch_calls(), 1);
    assert!(pipeline.next().await.is_none());
    // Stopping again is a no-op.
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fatal_fetch_error_leaves_running_without_a_reader() {
    let remote = MockQueue::new([Scripted::Fail(RemoteError::fatal(
        "ReceiveMessage",
        "AccessDenied",
    ))]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();
    let mut states = pipeline.watch_state();
    pipeline.start();

    tokio::time::timeout(
        Duration::from_secs(30),
        states.wait_for(|state| *state != PipelineState::Running),
    )
    .await
    .expect("state left running")
    .unwrap();
    assert_eq!(remote.fetch_calls(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopping);

    // The failure is still handed to the next reader.
    assert!(matches!(
        pipeline.next().await,
        Some(Err(ConsumerError::Fetch(_)))
    ));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_handle_moves_an_unread_pipeline_to_stopping() {
    let remote = MockQueue::empty();
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();
    pipeline.start();

    pipeline.stop_handle().stop();
    eventually(|| pipeline.state() == PipelineState::Stopping).await;

    assert!(pipeline.next().await.is_none());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_handle_ends_a_waiting_consumer() {
    let remote = MockQueue::empty();
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();
    let handle = pipeline.stop_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop();
    });

    assert!(pipeline.next().await.is_none());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.stop_handle().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn consume_is_lazy() {
    let remote = MockQueue::new([batch(0..1)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(remote.fetch_calls(), 0);

    pipeline.next().await.unwrap().unwrap();
    assert!(remote.fetch_calls() >= 1);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stopping_an_idle_pipeline_never_fetches() {
    let remote = MockQueue::new([batch(0..1)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.next().await.is_none());
    assert_eq!(remote.fetch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn fetch_requests_carry_the_configured_parameters() {
    let remote = MockQueue::new([batch(0..1)]);
    let settings = settings(0)
        .with_batch_size(7)
        .with_wait_time_seconds(5)
        .with_visibility_timeout_seconds(120)
        .with_attribute_names(vec!["ApproximateReceiveCount".to_string()])
        .with_message_attributes(vec!["trace_id".to_string()]);
    let consumer = Consumer::new(remote.clone(), settings, JsonCodec::<Value>::new()).unwrap();
    let mut pipeline = consumer.consume();

    pipeline.next().await.unwrap().unwrap();
    let request = &remote.fetch_requests()[0];
    assert_eq!(request.max_messages, 7);
    assert_eq!(request.wait_time_seconds, 5);
    assert_eq!(request.visibility_timeout_seconds, 120);
    assert_eq!(request.attribute_names, vec!["ApproximateReceiveCount"]);
    assert_eq!(request.message_attribute_names, vec!["trace_id"]);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn undecodable_body_stops_the_pipeline() {
    let remote = MockQueue::new([Scripted::Batch(vec![
        message(0),
        raw_message(1, "not json"),
    ])]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();

    match pipeline.next().await {
        Some(Err(ConsumerError::Decode { message_id, .. })) => assert_eq!(message_id, "message-1"),
        other => panic!("expected a decode error, got {other:?}"),
    }
    assert!(pipeline.next().await.is_none());
    assert!(remote.deletes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn independent_pipelines_have_independent_relays() {
    let remote = MockQueue::new([batch(0..2)]);
    let consumer = consumer(&remote, 0);
    let mut first = consumer.consume();
    let second = consumer.consume();

    first.next().await.unwrap().unwrap();
    assert_eq!(first.stats().fetched, 2);
    assert_eq!(second.stats().fetched, 0);
    assert_eq!(second.state(), PipelineState::Idle);
    first.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn into_stream_yields_deliveries() {
    use futures::StreamExt;

    let remote = MockQueue::new([batch(0..3)]);
    let consumer = consumer(&remote, 2);
    let stream = consumer.consume().into_stream();

    let bodies: Vec<u64> = stream
        .take(3)
        .map(|item| n(item.unwrap().body()))
        .collect()
        .await;
    assert_eq!(bodies, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_stream_abandons_deliveries_still_held() {
    use futures::StreamExt;

    let remote = MockQueue::new([batch(0..3)]);
    let consumer = consumer(&remote, 0);
    let mut stream = Box::pin(consumer.consume().into_stream());

    let held = stream.next().await.unwrap().unwrap();
    drop(stream);

    assert_eq!(held.state(), EnvelopeState::Abandoned);
    assert_eq!(held.ack().await.unwrap(), AckOutcome::Abandoned);
    assert!(remote.deletes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_a_pipeline_stops_it() {
    let remote = MockQueue::new([batch(0..2)]);
    let consumer = consumer(&remote, 0);
    let mut pipeline = consumer.consume();
    let states = pipeline.watch_state();

    let held = pipeline.next().await.unwrap().unwrap();
    drop(pipeline);

    assert_eq!(*states.borrow(), PipelineState::Stopped);
    assert_eq!(held.ack().await.unwrap(), AckOutcome::Abandoned);
    assert!(remote.deletes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn read_shares_one_pipeline() {
    let remote = MockQueue::new([batch(0..2)]);
    let mut consumer = consumer(&remote, 0);
    assert!(consumer.current_pipeline().is_none());
    assert_eq!(remote.fetch_calls(), 0);

    let first = consumer.read().await.unwrap();
    let second = consumer.read().await.unwrap();
    assert_eq!((n(first.body()), n(second.body())), (0, 1));
    assert_eq!(
        consumer.current_pipeline().map(|p| p.state()),
        Some(PipelineState::Running)
    );

    consumer.stop().await.unwrap();
    assert!(matches!(consumer.read().await, Err(ConsumerError::Stopped)));
}

#[tokio::test(start_paused = true)]
async fn run_until_acks_successes_and_leaves_failures() {
    let remote = MockQueue::new([batch(0..4)]);
    let consumer = consumer(&remote, 0);
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

    let handler = handler_fn(move |body: Value, _attributes: Attributes| {
        let done_tx = done_tx.clone();
        async move {
            let n = n(&body);
            let _ = done_tx.send(n);
            if n % 2 == 1 {
                return Err::<(), HandlerError>(format!("cannot handle {n}").into());
            }
            Ok(())
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let run = tokio::spawn(async move {
        consumer
            .run_until(handler, async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    for _ in 0..4 {
        done_rx.recv().await.unwrap();
    }
    // Let the last acknowledgment land.
    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(()).unwrap();

    run.await.unwrap().unwrap();
    assert_eq!(
        remote.deletes(),
        vec!["receipt-0".to_string(), "receipt-2".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn run_returns_fatal_errors() {
    let remote = MockQueue::new([
        batch(0..1),
        Scripted::Fail(RemoteError::fatal("ReceiveMessage", "AccessDenied")),
    ]);
    let consumer = consumer(&remote, 0);

    let result = consumer
        .run(handler_fn(|_body: Value, _attributes: Attributes| async {
            Ok::<(), HandlerError>(())
        }))
        .await;

    assert!(matches!(result, Err(ConsumerError::Fetch(_))));
}

#[test]
fn consumer_requires_an_inbound_queue_url() {
    let remote = MockQueue::empty();
    let settings = settings(0);
    let settings = rs_sqs_pipeline::SqsSettings {
        inbound_queue_url: None,
        ..settings
    };

    let err = Consumer::new(remote, settings, JsonCodec::<Value>::new()).unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Config(ConfigError::MissingQueueUrl("SQS_INBOUND_QUEUE_URL", _))
    ));
}

#[test]
fn consumer_rejects_invalid_settings() {
    let remote = MockQueue::empty();
    let settings = settings(0).with_batch_size(11);

    let err = Consumer::new(remote, settings, JsonCodec::<Value>::new()).unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Config(ConfigError::InvalidValue { name: "batch_size", .. })
    ));
}
