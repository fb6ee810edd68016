//! Library fulfillment worker.
//!
//! Long-polls the checkout queue and grants purchased games:
//!
//! ```text
//! queue --receive--> decode envelope --> add_to_library --> delete (ack)
//!                         |                    |
//!                         +---- failure -------+--> leave for redelivery
//!                                                   (or quarantine, if configured)
//! ```
//!
//! A delivery is deleted only after the library write succeeded. Anything
//! else leaves it on the queue; it reappears once its visibility window
//! ends. Library adds are idempotent set unions, so redelivery, duplicate
//! delivery and reordering across checkouts are all safe. No lock is taken
//! across consumers; concurrent worker processes rely on that idempotency.
//!
//! The loop has two states. `Polling` receives a batch and processes each
//! delivery in turn, isolating failures per message. A failed receive moves
//! to `Backoff`, which sleeps and returns to `Polling`. Shutdown is checked
//! between iterations, never in the middle of a message.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dlq::{Quarantine, QuarantinedMessage};
use crate::envelope::{self, DecodeError, FulfillmentEvent};
use crate::library::{LibraryError, LibraryScopeFactory, LibraryService};
use crate::queue::{Delivery, QueueTransport, ReceiveOptions, TransportError};

mod backoff;

pub use backoff::{BackoffPolicy, FailureBackoff, DEFAULT_BACKOFF};

/// Why a delivery was not acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Library update failed: {0}")]
    Library(#[from] LibraryError),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(#[source] TransportError),
}

impl ProcessingError {
    /// Short classification for logs and quarantine records.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Decode(_) => "decode",
            ProcessingError::Library(LibraryError::PlayerNotFound { .. }) => "player_not_found",
            ProcessingError::Library(LibraryError::Persistence(_)) => "persistence",
            ProcessingError::Library(LibraryError::Conflict { .. }) => "conflict",
            ProcessingError::Acknowledge(_) => "acknowledge",
        }
    }
}

/// Terminal outcome of processing one delivery.
#[derive(Debug)]
pub enum MessageOutcome {
    /// Library updated and delivery deleted.
    Acknowledged,
    /// Left on the queue for redelivery.
    Retained(ProcessingError),
    /// Moved to the quarantine channel and deleted from the queue.
    Quarantined,
}

impl MessageOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, MessageOutcome::Acknowledged)
    }

    pub fn is_retained(&self) -> bool {
        matches!(self, MessageOutcome::Retained(_))
    }

    pub fn is_quarantined(&self) -> bool {
        matches!(self, MessageOutcome::Quarantined)
    }
}

/// Counts of outcomes for one received batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub acknowledged: usize,
    pub retained: usize,
    pub quarantined: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Acknowledged => self.acknowledged += 1,
            MessageOutcome::Retained(_) => self.retained += 1,
            MessageOutcome::Quarantined => self.quarantined += 1,
        }
    }
}

/// Consumer loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Polling,
    Backoff,
}

/// Consumes checkout-completed events and grants games to players.
///
/// All collaborators are passed in at construction.
pub struct FulfillmentWorker {
    queue: Arc<dyn QueueTransport>,
    library: Arc<dyn LibraryScopeFactory>,
    receive: ReceiveOptions,
    backoff: BackoffPolicy,
    quarantine: Option<Quarantine>,
}

impl FulfillmentWorker {
    /// Create a worker with default receive options (10 messages, 20s wait,
    /// 30s visibility), a fixed 5s backoff and no quarantine.
    pub fn new(queue: Arc<dyn QueueTransport>, library: Arc<dyn LibraryScopeFactory>) -> Self {
        Self {
            queue,
            library,
            receive: ReceiveOptions::default(),
            backoff: BackoffPolicy::default(),
            quarantine: None,
        }
    }

    pub fn with_receive_options(mut self, receive: ReceiveOptions) -> Self {
        self.receive = receive;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_quarantine(mut self, quarantine: Quarantine) -> Self {
        self.quarantine = Some(quarantine);
        self
    }

    pub fn receive_options(&self) -> &ReceiveOptions {
        &self.receive
    }

    /// Receive one batch and process every delivery in it.
    ///
    /// Only a failed receive is returned as an error. Per-message failures
    /// are reflected in the summary.
    pub async fn poll_once(&self) -> Result<BatchSummary, TransportError> {
        let deliveries = self.queue.receive(&self.receive).await?;

        let mut summary = BatchSummary {
            received: deliveries.len(),
            ..Default::default()
        };

        for delivery in &deliveries {
            let outcome = self.process_delivery(delivery).await;
            summary.record(&outcome);
        }

        Ok(summary)
    }

    /// Decode, apply and acknowledge one delivery.
    ///
    /// Never fails: the outcome says whether the delivery was deleted.
    pub async fn process_delivery(&self, delivery: &Delivery) -> MessageOutcome {
        // The scope stays open until the delivery is settled.
        let scope = self.library.begin();
        let outcome = match apply(scope.service(), delivery).await {
            Ok(event) => self.acknowledge(delivery, &event).await,
            Err(error) => self.retain_or_quarantine(delivery, error).await,
        };
        drop(scope);
        outcome
    }

    async fn acknowledge(&self, delivery: &Delivery, event: &FulfillmentEvent) -> MessageOutcome {
        match self.queue.delete(&delivery.receipt_handle).await {
            Ok(()) => {
                info!(
                    message_id = %delivery.message_id,
                    player_id = %event.player_id,
                    games = event.game_ids.len(),
                    "Fulfillment complete for player. Games added."
                );
                MessageOutcome::Acknowledged
            }
            Err(e) => {
                warn!(
                    message_id = %delivery.message_id,
                    player_id = %event.player_id,
                    error = %e,
                    "Library updated but delete failed. Message will be redelivered."
                );
                MessageOutcome::Retained(ProcessingError::Acknowledge(e))
            }
        }
    }

    async fn retain_or_quarantine(&self, delivery: &Delivery, error: ProcessingError) -> MessageOutcome {
        if let Some(quarantine) = self.quarantine.as_ref().filter(|q| q.applies_to(delivery)) {
            if self.quarantine_delivery(quarantine, delivery, &error).await {
                return MessageOutcome::Quarantined;
            }
        }

        error!(
            message_id = %delivery.message_id,
            receive_count = delivery.approximate_receive_count,
            kind = error.kind(),
            error = %error,
            "Failed to process message. Message will return to the queue (retry)."
        );
        MessageOutcome::Retained(error)
    }

    /// Publish to quarantine, then delete the original. True if both succeeded.
    async fn quarantine_delivery(
        &self,
        quarantine: &Quarantine,
        delivery: &Delivery,
        error: &ProcessingError,
    ) -> bool {
        let message = QuarantinedMessage::from_delivery(delivery, error.to_string(), error.kind());

        if let Err(e) = quarantine.publisher.publish(message).await {
            error!(
                message_id = %delivery.message_id,
                error = %e,
                "Failed to quarantine message"
            );
            return false;
        }

        match self.queue.delete(&delivery.receipt_handle).await {
            Ok(()) => {
                warn!(
                    message_id = %delivery.message_id,
                    receive_count = delivery.approximate_receive_count,
                    kind = error.kind(),
                    error = %error,
                    "Message quarantined after repeated failures"
                );
                true
            }
            Err(e) => {
                // Redelivery will quarantine it again; duplicates there are expected.
                error!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Message quarantined but delete failed"
                );
                false
            }
        }
    }

    /// Run until `shutdown` reads true or its sender is dropped.
    ///
    /// Shutdown takes effect after the in-progress batch (at most one
    /// receive wait plus its messages). A stop signal cuts a pending backoff
    /// short; other changes to the channel do not.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_messages = self.receive.max_messages,
            wait_secs = self.receive.wait_time.as_secs(),
            visibility_secs = self.receive.visibility_timeout.as_secs(),
            "Starting library fulfillment worker"
        );

        let mut backoff = FailureBackoff::new(self.backoff);
        let mut state = WorkerState::Polling;

        while !is_shutdown(&shutdown) {
            state = match state {
                WorkerState::Polling => match self.poll_once().await {
                    Ok(summary) => {
                        backoff.reset();
                        if summary.received > 0 {
                            debug!(
                                received = summary.received,
                                acknowledged = summary.acknowledged,
                                retained = summary.retained,
                                quarantined = summary.quarantined,
                                "Batch processed"
                            );
                        }
                        WorkerState::Polling
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to receive messages from queue");
                        WorkerState::Backoff
                    }
                },
                WorkerState::Backoff => {
                    let delay = backoff.next_delay();
                    warn!(
                        delay_ms = delay.as_millis() as u64,
                        consecutive_failures = backoff.consecutive_failures(),
                        "Backing off before next receive"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait_for(|stop| *stop) => {}
                    }
                    WorkerState::Polling
                }
            };
        }

        info!("Library fulfillment worker stopped");
    }
}

/// Decode the delivery and apply it to the library.
async fn apply(
    library: &dyn LibraryService,
    delivery: &Delivery,
) -> Result<FulfillmentEvent, ProcessingError> {
    let event = envelope::decode(&delivery.body)?;
    library
        .add_to_library(&event.player_id, &event.game_ids)
        .await?;
    Ok(event)
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

// ============================================================================
// Background Task
// ============================================================================

/// Handle to a running worker task.
pub struct WorkerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop after its current iteration.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Signal the worker to stop and wait for it to finish.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.stop();
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the worker loop as a background task.
pub fn spawn(worker: FulfillmentWorker) -> WorkerHandle {
    let (cancel, shutdown) = watch::channel(false);
    let task = tokio::spawn(async move { worker.run(shutdown).await });
    WorkerHandle { cancel, task }
}
