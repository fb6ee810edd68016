//! gamelib-fulfillment: library fulfillment worker
//!
//! Long-polls the checkout queue and adds purchased games to player
//! libraries until SIGINT/SIGTERM.
//!
//! ## Configuration
//! ```yaml
//! queue:
//!   type: sqs
//!   sqs:
//!     queue_url: https://sqs.us-east-1.amazonaws.com/123456789012/checkout-completed
//!     region: us-east-1
//!   max_messages: 10
//!   wait_time_secs: 20
//!   visibility_timeout_secs: 30
//!
//! storage:
//!   type: mongodb
//!   mongodb:
//!     uri: mongodb://localhost:27017
//!     database: gamestore
//!     collection: users
//!
//! worker:
//!   backoff:
//!     policy: fixed
//!     delay_ms: 5000
//!
//! # Optional: quarantine messages after repeated failures
//! dlq:
//!   max_receive_count: 5
//!   queue_url: https://sqs.us-east-1.amazonaws.com/123456789012/checkout-quarantine
//! ```
//!
//! Any key can be overridden with `GAMELIB__<SECTION>__<KEY>`, e.g.
//! `GAMELIB__QUEUE__SQS__QUEUE_URL`.

use std::sync::Arc;

use tracing::{info, warn};

use gamelib::config::{Config, QueueType, StorageType};
use gamelib::dlq::{Quarantine, SqsDeadLetterPublisher};
use gamelib::library::{
    InMemoryPlayerStore, LibraryMutator, LibraryService, MongoPlayerStore, SharedLibrary,
};
use gamelib::queue::sqs::build_client;
use gamelib::queue::{InMemoryQueue, QueueTransport, SqsQueue};
use gamelib::utils::bootstrap::{connect_with_retry, init_tracing};
use gamelib::worker::{self, FulfillmentWorker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let queue: Arc<dyn QueueTransport> = match config.queue.queue_type {
        QueueType::Sqs => Arc::new(SqsQueue::connect(&config.queue.sqs).await?),
        QueueType::Memory => {
            warn!("Using in-memory queue; nothing outside this process can publish to it");
            Arc::new(InMemoryQueue::new())
        }
    };

    let library: Arc<dyn LibraryService> = match config.storage.storage_type {
        StorageType::Mongodb => {
            let mongo = &config.storage.mongodb;
            let store = connect_with_retry("mongodb", || MongoPlayerStore::connect(mongo)).await?;
            Arc::new(LibraryMutator::new(store))
        }
        StorageType::Memory => {
            warn!("Using in-memory player store; libraries are lost on exit");
            Arc::new(LibraryMutator::new(InMemoryPlayerStore::new()))
        }
    };

    let mut fulfillment = FulfillmentWorker::new(queue, Arc::new(SharedLibrary::new(library)))
        .with_receive_options(config.queue.receive_options())
        .with_backoff(config.worker.backoff.policy());

    if let (Some(policy), Some(dlq_url)) = (config.dlq.policy(), config.dlq.queue_url.as_deref()) {
        let sqs = build_client(
            config.queue.sqs.region.as_deref(),
            config.queue.sqs.endpoint_url.as_deref(),
        )
        .await;
        info!(
            max_receive_count = policy.max_receive_count,
            queue_url = %dlq_url,
            "Quarantine enabled"
        );
        fulfillment = fulfillment.with_quarantine(Quarantine::new(
            policy,
            Arc::new(SqsDeadLetterPublisher::new(sqs, dlq_url)),
        ));
    }

    let handle = worker::spawn(fulfillment);

    shutdown_signal().await?;
    info!("Shutdown requested, finishing current batch");

    handle.shutdown().await?;
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
