//! In-memory PlayerStore for standalone mode and testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LibraryError, PlayerLibrary, PlayerStore, Result};
use crate::envelope::{GameId, PlayerId};

#[derive(Debug, Clone, Default)]
struct StoredPlayer {
    games: Vec<GameId>,
    version: u64,
}

/// Player store that keeps libraries in memory.
///
/// Stores game lists verbatim (duplicates included), like a document
/// store array field would.
#[derive(Default)]
pub struct InMemoryPlayerStore {
    players: RwLock<HashMap<PlayerId, StoredPlayer>>,
    fail_on_load: RwLock<bool>,
    fail_on_save: RwLock<bool>,
    pending_conflicts: AtomicU32,
    saves: AtomicUsize,
}

impl InMemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a player record with an empty library.
    pub async fn insert_player(&self, player_id: impl Into<PlayerId>) {
        self.insert_player_with_games(player_id, Vec::new()).await;
    }

    /// Create or overwrite a player record with the given games, stored as-is.
    pub async fn insert_player_with_games(&self, player_id: impl Into<PlayerId>, games: Vec<GameId>) {
        let mut players = self.players.write().await;
        let entry = players.entry(player_id.into()).or_default();
        entry.games = games;
        entry.version += 1;
    }

    /// Remove a player record.
    pub async fn remove_player(&self, player_id: &PlayerId) {
        self.players.write().await.remove(player_id);
    }

    /// Raw stored games for a player, duplicates included.
    pub async fn stored_games(&self, player_id: &PlayerId) -> Option<Vec<GameId>> {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|p| p.games.clone())
    }

    pub async fn set_fail_on_load(&self, fail: bool) {
        *self.fail_on_load.write().await = fail;
    }

    pub async fn set_fail_on_save(&self, fail: bool) {
        *self.fail_on_save.write().await = fail;
    }

    /// Make the next `count` saves lose a race against a simulated
    /// concurrent writer.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerStore for InMemoryPlayerStore {
    async fn load(&self, player_id: &PlayerId) -> Result<Option<PlayerLibrary>> {
        if *self.fail_on_load.read().await {
            return Err(LibraryError::Persistence("Mock load failure".to_string()));
        }

        Ok(self.players.read().await.get(player_id).map(|p| PlayerLibrary {
            player_id: player_id.clone(),
            games: p.games.clone(),
            version: p.version,
        }))
    }

    async fn save(&self, library: &PlayerLibrary) -> Result<()> {
        if *self.fail_on_save.read().await {
            return Err(LibraryError::Persistence("Mock save failure".to_string()));
        }

        let mut players = self.players.write().await;
        let stored = players
            .get_mut(&library.player_id)
            .ok_or_else(|| LibraryError::PlayerNotFound {
                player_id: library.player_id.clone(),
            })?;

        let conflicted = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            stored.version += 1;
        }

        if stored.version != library.version {
            return Err(LibraryError::Conflict {
                player_id: library.player_id.clone(),
                expected: library.version,
            });
        }

        stored.games = library.games.clone();
        stored.version += 1;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
