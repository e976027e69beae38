use std::fmt;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::envelope::{Delivery, Envelope};
use super::fetch::FetchLoop;
use super::ledger::{Ledger, PipelineStats};
use super::relay::{RelayReceiver, relay};
use crate::codec::Codec;
use crate::config::RetryPolicy;
use crate::errors::ConsumerError;
use crate::remote::{FetchRequest, RemoteQueue};

/// Lifecycle of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Requests shutdown of a pipeline from another task.
///
/// The pipeline notices at its next suspension point; the task driving it
/// then sees the sequence end.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Everything needed to spawn a fetch loop.
pub(crate) struct PipelineConfig<C> {
    pub(crate) remote: Arc<dyn RemoteQueue>,
    pub(crate) queue_url: Arc<str>,
    pub(crate) request: FetchRequest,
    pub(crate) prefetch_limit: usize,
    pub(crate) retry: RetryPolicy,
    pub(crate) codec: Arc<C>,
}

type LoopOutcome = Result<Result<(), ConsumerError>, JoinError>;

enum Stage<T> {
    Idle,
    Running {
        task: JoinHandle<Result<(), ConsumerError>>,
        relay: RelayReceiver<Envelope<T>>,
    },
    Finished,
}

enum Event<T> {
    Envelope(Option<Envelope<T>>),
    LoopExited(LoopOutcome),
    StopRequested,
}

/// One consumption session: a fetch loop, its relay queue and the lazy
/// sequence of deliveries drawn from it.
///
/// Nothing is fetched until the first call to [`next`](Pipeline::next) or
/// [`start`](Pipeline::start). A stopped pipeline can't be restarted; ask
/// the [`Consumer`](crate::consumer::Consumer) for a new one instead.
pub struct Pipeline<C: Codec> {
    config: PipelineConfig<C>,
    ledger: Arc<Ledger>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PipelineState>>,
    stage: Stage<C::Item>,
}

impl<C: Codec> Pipeline<C> {
    pub(crate) fn new(config: PipelineConfig<C>) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Pipeline {
            config,
            ledger: Arc::new(Ledger::new()),
            cancel: CancellationToken::new(),
            state: Arc::new(state),
            stage: Stage::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver that observes every lifecycle transition.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        self.ledger.stats()
    }

    /// Envelopes currently waiting in the relay queue.
    pub fn buffered(&self) -> usize {
        match &self.stage {
            Stage::Running { relay, .. } => relay.len(),
            _ => 0,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Spawns the fetch loop if it isn't running yet. Has no effect once
    /// the pipeline is running or stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if !matches!(self.stage, Stage::Idle) {
            return;
        }

        let (sender, receiver) = relay(self.config.prefetch_limit);
        let fetch_loop = FetchLoop {
            remote: Arc::clone(&self.config.remote),
            queue_url: Arc::clone(&self.config.queue_url),
            request: self.config.request.clone(),
            retry: self.config.retry.clone(),
            codec: Arc::clone(&self.config.codec),
            ledger: Arc::clone(&self.ledger),
            relay: sender,
            cancel: self.cancel.child_token(),
        };

        self.transition(PipelineState::Running);

        // A loop that ends on its own (fatal error or stop request) moves
        // the pipeline to `stopping`; its outcome stays in the join handle.
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let outcome = fetch_loop.run().await;
            let moved = state.send_if_modified(|current| {
                let running = *current == PipelineState::Running;
                if running {
                    *current = PipelineState::Stopping;
                }
                running
            });
            if moved {
                info!(to = %PipelineState::Stopping, failed = outcome.is_err(), "fetch loop ended");
            }
            outcome
        });

        self.stage = Stage::Running {
            task,
            relay: receiver,
        };
    }

    /// Waits for the next delivery.
    ///
    /// Returns `None` once the pipeline has stopped. A fatal fetch failure
    /// is returned exactly once as `Some(Err(..))`, after which the
    /// pipeline is stopped.
    pub async fn next(&mut self) -> Option<Result<Delivery<C::Item>, ConsumerError>> {
        self.start();

        let Stage::Running { task, relay } = &mut self.stage else {
            return None;
        };

        let event = tokio::select! {
            biased;
            outcome = &mut *task => Event::LoopExited(outcome),
            _ = self.cancel.cancelled() => Event::StopRequested,
            envelope = relay.pop() => Event::Envelope(envelope),
        };

        match event {
            Event::Envelope(Some(envelope)) => {
                self.ledger.deliver(envelope.id);
                Some(Ok(Delivery::new(
                    envelope,
                    Arc::clone(&self.config.queue_url),
                    Arc::clone(&self.config.remote),
                    Arc::clone(&self.ledger),
                )))
            }
            Event::Envelope(None) => {
                // Relay closed from the sending side: the loop has returned.
                let outcome = (&mut *task).await;
                self.shutdown(Some(outcome)).await.err().map(Err)
            }
            Event::LoopExited(outcome) => self.shutdown(Some(outcome)).await.err().map(Err),
            Event::StopRequested => self.shutdown(None).await.err().map(Err),
        }
    }

    /// Stops the fetch loop, abandons everything still buffered or awaiting
    /// acknowledgment, and moves to `stopped`.
    ///
    /// Idempotent. Returns the fetch loop's fatal error if it failed and
    /// nobody has observed that failure through [`next`](Pipeline::next).
    pub async fn stop(&mut self) -> Result<(), ConsumerError> {
        self.shutdown(None).await
    }

    /// Turns the pipeline into a [`Stream`] of deliveries.
    pub fn into_stream(self) -> impl Stream<Item = Result<Delivery<C::Item>, ConsumerError>> {
        futures::stream::unfold(self, |mut pipeline| async move {
            pipeline.next().await.map(|item| (item, pipeline))
        })
    }

    async fn shutdown(&mut self, exited: Option<LoopOutcome>) -> Result<(), ConsumerError> {
        let stage = std::mem::replace(&mut self.stage, Stage::Finished);
        let Stage::Running { task, mut relay } = stage else {
            self.ledger.abandon_outstanding();
            self.transition(PipelineState::Stopped);
            return Ok(());
        };

        self.transition(PipelineState::Stopping);
        self.cancel.cancel();

        let outcome = match exited {
            Some(outcome) => outcome,
            None => task.await,
        };

        relay.close();
        while let Some(envelope) = relay.try_pop() {
            self.ledger.release(envelope.id);
        }
        self.ledger.abandon_outstanding();
        self.transition(PipelineState::Stopped);

        let stats = self.ledger.stats();
        info!(
            abandoned = stats.abandoned,
            fetched = stats.fetched,
            acknowledged = stats.acknowledged,
            "pipeline stopped"
        );

        match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "fetch loop task failed");
                Err(ConsumerError::TaskFailed(e.to_string()))
            }
        }
    }

    fn transition(&self, next: PipelineState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "pipeline state changed");
        }
    }
}

impl<C: Codec> Drop for Pipeline<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if matches!(self.stage, Stage::Finished) {
            return;
        }
        // Dropped without `stop()`: outstanding deliveries must not be
        // deleted by a late ack.
        let abandoned = self.ledger.abandon_outstanding();
        self.state.send_replace(PipelineState::Stopped);
        debug!(abandoned, "pipeline dropped");
    }
}

impl<C: Codec> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("queue_url", &self.config.queue_url)
            .field("state", &self.state())
            .field("buffered", &self.buffered())
            .field("stats", &self.stats())
            .finish()
    }
}
