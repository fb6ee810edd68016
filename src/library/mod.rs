//! Player library mutation.
//!
//! This module contains:
//! - `LibraryService` trait: add/list/remove games in a player's library
//! - `PlayerStore` trait: durable per-player library storage
//! - `LibraryMutator`: the `LibraryService` used by the fulfillment worker
//! - `LibraryScopeFactory`: per-message unit of work for the worker
//!
//! Adding games is a set union. Applying the same checkout once or N times,
//! or applying two checkouts in either order, yields the same library. The
//! fulfillment worker relies on this for at-least-once delivery and must not
//! be pointed at a "replace library" style mutation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, info, warn};

use crate::envelope::{GameId, PlayerId};

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use memory::InMemoryPlayerStore;
#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoPlayerStore;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, LibraryError>;

/// Errors that can occur while reading or mutating a player library.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: PlayerId },

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Concurrent library update for player {player_id}: expected version {expected}")]
    Conflict { player_id: PlayerId, expected: u64 },
}

impl LibraryError {
    /// Another writer updated the library between load and save.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LibraryError::Conflict { .. })
    }
}

/// A player's owned games as read from the store.
///
/// `version` is the store's write counter, used for compare-and-set on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLibrary {
    pub player_id: PlayerId,
    pub games: Vec<GameId>,
    pub version: u64,
}

/// Durable storage of player libraries.
///
/// The store is not required to enforce set semantics on `games`.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Load a player's library. `None` if the player record does not exist.
    async fn load(&self, player_id: &PlayerId) -> Result<Option<PlayerLibrary>>;

    /// Persist `library.games`, provided the stored version still equals
    /// `library.version`. Returns `LibraryError::Conflict` otherwise.
    async fn save(&self, library: &PlayerLibrary) -> Result<()>;
}

/// Library operations exposed to the fulfillment worker and other callers.
#[async_trait]
pub trait LibraryService: Send + Sync {
    /// Grant games to a player. Idempotent.
    async fn add_to_library(&self, player_id: &PlayerId, game_ids: &[GameId]) -> Result<()>;

    /// Games currently owned by the player.
    async fn player_games(&self, player_id: &PlayerId) -> Result<Vec<GameId>>;

    /// Revoke a game. Removing a game the player does not own is a no-op.
    async fn remove_from_library(&self, player_id: &PlayerId, game_id: &GameId) -> Result<()>;
}

#[async_trait]
impl<T: PlayerStore + ?Sized> PlayerStore for Arc<T> {
    async fn load(&self, player_id: &PlayerId) -> Result<Option<PlayerLibrary>> {
        (**self).load(player_id).await
    }

    async fn save(&self, library: &PlayerLibrary) -> Result<()> {
        (**self).save(library).await
    }
}

#[async_trait]
impl<T: LibraryService + ?Sized> LibraryService for Arc<T> {
    async fn add_to_library(&self, player_id: &PlayerId, game_ids: &[GameId]) -> Result<()> {
        (**self).add_to_library(player_id, game_ids).await
    }

    async fn player_games(&self, player_id: &PlayerId) -> Result<Vec<GameId>> {
        (**self).player_games(player_id).await
    }

    async fn remove_from_library(&self, player_id: &PlayerId, game_id: &GameId) -> Result<()> {
        (**self).remove_from_library(player_id, game_id).await
    }
}

/// Order-preserving union of `existing` and `incoming`.
///
/// Duplicates are dropped from both sides, so a store that already holds
/// repeated entries is normalized on the next write.
pub fn union(existing: &[GameId], incoming: &[GameId]) -> Vec<GameId> {
    let mut seen = std::collections::HashSet::with_capacity(existing.len() + incoming.len());
    existing
        .iter()
        .chain(incoming.iter())
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}

/// Backoff for version-conflict retries on library writes.
///
/// - Min delay: 10ms
/// - Max delay: 1s
/// - Max attempts: 8
/// - Jitter enabled
pub fn conflict_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(8)
        .with_jitter()
}

/// `LibraryService` backed by a `PlayerStore`.
///
/// Each add is a load, union, save cycle. Saves are compare-and-set on the
/// library version and retried on conflict, so concurrent consumers granting
/// different checkouts to the same player cannot lose each other's games.
pub struct LibraryMutator<S> {
    store: S,
    retry: ExponentialBuilder,
}

impl<S: PlayerStore> LibraryMutator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: conflict_backoff(),
        }
    }

    /// Override the conflict retry backoff.
    pub fn with_retry(mut self, retry: ExponentialBuilder) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn load_existing(&self, player_id: &PlayerId) -> Result<PlayerLibrary> {
        self.store
            .load(player_id)
            .await?
            .ok_or_else(|| LibraryError::PlayerNotFound {
                player_id: player_id.clone(),
            })
    }

    /// Run one load/modify/save cycle, retrying on version conflicts.
    async fn update<F>(&self, player_id: &PlayerId, modify: F) -> Result<PlayerLibrary>
    where
        F: Fn(&[GameId]) -> Vec<GameId> + Send + Sync,
    {
        let mut delays = self.retry.build();
        loop {
            let current = self.load_existing(player_id).await?;
            let updated = PlayerLibrary {
                games: modify(&current.games),
                ..current
            };

            match self.store.save(&updated).await {
                Ok(()) => return Ok(updated),
                Err(e) if e.is_conflict() => match delays.next() {
                    Some(delay) => {
                        debug!(
                            player_id = %player_id,
                            delay_ms = delay.as_millis() as u64,
                            "Library version conflict, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(player_id = %player_id, "Library version conflict retries exhausted");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: PlayerStore> LibraryService for LibraryMutator<S> {
    async fn add_to_library(&self, player_id: &PlayerId, game_ids: &[GameId]) -> Result<()> {
        let updated = self
            .update(player_id, |existing| union(existing, game_ids))
            .await?;

        info!(
            player_id = %player_id,
            granted = game_ids.len(),
            owned = updated.games.len(),
            "Library updated"
        );
        Ok(())
    }

    async fn player_games(&self, player_id: &PlayerId) -> Result<Vec<GameId>> {
        let library = self.load_existing(player_id).await?;
        // Stored collections may hold duplicates; callers see a set.
        Ok(union(&library.games, &[]))
    }

    async fn remove_from_library(&self, player_id: &PlayerId, game_id: &GameId) -> Result<()> {
        self.update(player_id, |existing| {
            existing.iter().filter(|g| *g != game_id).cloned().collect()
        })
        .await?;

        info!(player_id = %player_id, game_id = %game_id, "Game removed from library");
        Ok(())
    }
}

// ============================================================================
// Per-message scope
// ============================================================================

/// Library service scoped to the processing of a single message.
///
/// Dropped when the worker finishes with the message, whatever the outcome.
pub struct LibraryScope {
    service: Box<dyn LibraryService>,
    id: uuid::Uuid,
}

impl LibraryScope {
    pub fn new(service: Box<dyn LibraryService>) -> Self {
        let id = uuid::Uuid::new_v4();
        debug!(scope = %id, "Library scope opened");
        Self { service, id }
    }

    pub fn service(&self) -> &dyn LibraryService {
        self.service.as_ref()
    }
}

impl Drop for LibraryScope {
    fn drop(&mut self) {
        debug!(scope = %self.id, "Library scope released");
    }
}

/// Creates a fresh `LibraryScope` per message.
pub trait LibraryScopeFactory: Send + Sync {
    fn begin(&self) -> LibraryScope;
}

/// Scope factory handing out a shared service.
///
/// Suitable when the service holds only pooled clients (MongoDB, in-memory).
pub struct SharedLibrary {
    service: Arc<dyn LibraryService>,
}

impl SharedLibrary {
    pub fn new(service: Arc<dyn LibraryService>) -> Self {
        Self { service }
    }
}

impl LibraryScopeFactory for SharedLibrary {
    fn begin(&self) -> LibraryScope {
        LibraryScope::new(Box::new(Arc::clone(&self.service)))
    }
}
