//! In-memory queue with visibility-window semantics.
//!
//! Behaves like a single SQS queue inside the process: received messages are
//! hidden for the visibility timeout, reappear with an incremented receive
//! count if not deleted, and each delivery gets a fresh receipt handle.
//! Used for standalone mode and for driving the worker in tests.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{Delivery, QueueTransport, ReceiptHandle, ReceiveOptions, Result, TransportError};

#[derive(Debug)]
struct QueuedMessage {
    message_id: String,
    body: String,
    receive_count: u32,
    /// Current delivery's receipt handle and the end of its visibility window.
    in_flight: Option<(ReceiptHandle, Instant)>,
}

impl QueuedMessage {
    fn is_available(&self, now: Instant) -> bool {
        match &self.in_flight {
            None => true,
            Some((_, until)) => *until <= now,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<QueuedMessage>,
    delete_calls: Vec<ReceiptHandle>,
    deleted_message_ids: Vec<String>,
    receive_attempts: Vec<Instant>,
}

/// In-process queue for standalone mode and testing.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    fail_receives: AtomicU32,
    fail_deletes: AtomicU32,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message body. Returns the generated message id.
    pub async fn send(&self, body: impl Into<String>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.state.lock().await.messages.push(QueuedMessage {
            message_id: message_id.clone(),
            body: body.into(),
            receive_count: 0,
            in_flight: None,
        });
        self.notify.notify_waiters();
        message_id
    }

    /// End every open visibility window now, as if the timeout had elapsed.
    pub async fn expire_in_flight(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        for message in state.messages.iter_mut() {
            if let Some((_, until)) = message.in_flight.as_mut() {
                *until = now;
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Fail the next `count` receive calls with a transport error.
    pub fn fail_next_receives(&self, count: u32) {
        self.fail_receives.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` delete calls with a transport error.
    pub fn fail_next_deletes(&self, count: u32) {
        self.fail_deletes.store(count, Ordering::SeqCst);
    }

    /// Every receipt handle passed to `delete`, in call order.
    pub async fn delete_calls(&self) -> Vec<ReceiptHandle> {
        self.state.lock().await.delete_calls.clone()
    }

    /// Ids of messages permanently removed by a successful delete.
    pub async fn deleted_message_ids(&self) -> Vec<String> {
        self.state.lock().await.deleted_message_ids.clone()
    }

    /// When each receive call started, failed ones included.
    pub async fn receive_attempts(&self) -> Vec<Instant> {
        self.state.lock().await.receive_attempts.clone()
    }

    /// Messages not yet deleted, in flight or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages currently hidden by an open visibility window.
    pub async fn in_flight_count(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| !m.is_available(now))
            .count()
    }

    /// Receive count of a message still on the queue.
    pub async fn receive_count(&self, message_id: &str) -> Option<u32> {
        self.state
            .lock()
            .await
            .messages
            .iter()
            .find(|m| m.message_id == message_id)
            .map(|m| m.receive_count)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<Delivery>> {
        let started = Instant::now();
        self.state.lock().await.receive_attempts.push(started);

        if Self::take_failure(&self.fail_receives) {
            return Err(TransportError::Receive("Mock receive failure".to_string()));
        }

        let deadline = started + options.wait_time;
        let max = options.max_messages as usize;

        loop {
            // Registered before inspecting state so a concurrent send is not missed.
            let notified = self.notify.notified();

            let next_visible = {
                let now = Instant::now();
                let mut state = self.state.lock().await;
                let mut batch = Vec::new();

                for message in state.messages.iter_mut() {
                    if batch.len() >= max {
                        break;
                    }
                    if !message.is_available(now) {
                        continue;
                    }
                    let handle = ReceiptHandle::new(Uuid::new_v4().to_string());
                    message.receive_count += 1;
                    message.in_flight = Some((handle.clone(), now + options.visibility_timeout));
                    batch.push(Delivery {
                        message_id: message.message_id.clone(),
                        receipt_handle: handle,
                        body: message.body.clone(),
                        approximate_receive_count: message.receive_count,
                    });
                }

                if !batch.is_empty() {
                    debug!(count = batch.len(), "In-memory queue delivered batch");
                    return Ok(batch);
                }

                state
                    .messages
                    .iter()
                    .filter_map(|m| m.in_flight.as_ref().map(|(_, until)| *until))
                    .min()
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &ReceiptHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        state.delete_calls.push(receipt_handle.clone());

        if Self::take_failure(&self.fail_deletes) {
            return Err(TransportError::Delete("Mock delete failure".to_string()));
        }

        let position = state.messages.iter().position(|m| {
            m.in_flight
                .as_ref()
                .is_some_and(|(handle, _)| handle == receipt_handle)
        });

        match position {
            Some(index) => {
                let message = state.messages.remove(index);
                state.deleted_message_ids.push(message.message_id);
                Ok(())
            }
            None => Err(TransportError::Delete(format!(
                "Receipt handle is not valid: {}",
                receipt_handle
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn quick(max_messages: u32) -> ReceiveOptions {
        ReceiveOptions {
            max_messages,
            wait_time: Duration::from_millis(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_receive_respects_batch_size() {
        let queue = InMemoryQueue::new();
        for i in 0..15 {
            queue.send(format!("m{}", i)).await;
        }

        let first = queue.receive(&quick(10)).await.unwrap();
        let second = queue.receive(&quick(10)).await.unwrap();

        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 5);
        assert_eq!(queue.in_flight_count().await, 15);
    }

    #[tokio::test]
    async fn test_receive_empty_after_wait() {
        let queue = InMemoryQueue::new();
        let started = Instant::now();

        let batch = queue.receive(&quick(10)).await.unwrap();

        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_send() {
        let queue = std::sync::Arc::new(InMemoryQueue::new());
        let options = ReceiveOptions {
            wait_time: Duration::from_secs(5),
            ..quick(10)
        };

        let receiver = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.receive(&options).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.send("late").await;

        let batch = receiver.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test]
    async fn test_in_flight_hidden_until_expired() {
        let queue = InMemoryQueue::new();
        let id = queue.send("m").await;

        let first = queue.receive(&quick(10)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].approximate_receive_count, 1);

        assert!(queue.receive(&quick(10)).await.unwrap().is_empty());

        queue.expire_in_flight().await;
        let second = queue.receive(&quick(10)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].approximate_receive_count, 2);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
        assert_eq!(queue.receive_count(&id).await, Some(2));
    }

    #[tokio::test]
    async fn test_visibility_timeout_elapses() {
        let queue = InMemoryQueue::new();
        queue.send("m").await;
        let options = ReceiveOptions {
            max_messages: 10,
            wait_time: Duration::from_millis(500),
            visibility_timeout: Duration::from_millis(30),
        };

        queue.receive(&options).await.unwrap();
        let redelivered = queue.receive(&options).await.unwrap();

        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].approximate_receive_count, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_message() {
        let queue = InMemoryQueue::new();
        let id = queue.send("m").await;

        let batch = queue.receive(&quick(10)).await.unwrap();
        queue.delete(&batch[0].receipt_handle).await.unwrap();

        assert!(queue.is_empty().await);
        assert_eq!(queue.deleted_message_ids().await, vec![id]);
    }

    #[tokio::test]
    async fn test_stale_receipt_handle_rejected() {
        let queue = InMemoryQueue::new();
        queue.send("m").await;

        let first = queue.receive(&quick(10)).await.unwrap();
        queue.expire_in_flight().await;
        let second = queue.receive(&quick(10)).await.unwrap();

        let result = queue.delete(&first[0].receipt_handle).await;
        assert!(matches!(result, Err(TransportError::Delete(_))));

        queue.delete(&second[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty().await);
        assert_eq!(queue.delete_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let queue = InMemoryQueue::new();
        queue.send("m").await;
        queue.fail_next_receives(1);
        queue.fail_next_deletes(1);

        assert!(queue.receive(&quick(10)).await.is_err());
        let batch = queue.receive(&quick(10)).await.unwrap();

        assert!(queue.delete(&batch[0].receipt_handle).await.is_err());
        queue.delete(&batch[0].receipt_handle).await.unwrap();
        assert_eq!(queue.receive_attempts().await.len(), 2);
    }
}
