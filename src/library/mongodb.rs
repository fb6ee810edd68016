//! MongoDB PlayerStore implementation.
//!
//! Player documents live in the users collection. The owned games are the
//! `Library` array on the player document; `LibraryVersion` is maintained
//! here for compare-and-set writes and is absent on documents that have
//! never been written by this store (treated as version 0).
//!
//! Identifiers that parse as UUIDs are stored as BSON binary subtype 4
//! (standard GUID representation); anything else is stored as a string.

use async_trait::async_trait;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, Binary, Bson, Document};
use mongodb::{Client, Collection};
use tracing::{debug, info};

use super::{LibraryError, PlayerLibrary, PlayerStore, Result};
use crate::config::MongoStoreConfig;
use crate::envelope::{GameId, PlayerId};

/// Field holding the owned games.
pub(crate) const LIBRARY_FIELD: &str = "Library";
/// Field holding the compare-and-set counter.
pub(crate) const VERSION_FIELD: &str = "LibraryVersion";

impl From<mongodb::error::Error> for LibraryError {
    fn from(e: mongodb::error::Error) -> Self {
        LibraryError::Persistence(e.to_string())
    }
}

/// MongoDB implementation of PlayerStore.
pub struct MongoPlayerStore {
    players: Collection<Document>,
}

impl MongoPlayerStore {
    /// Connect using the given configuration and verify the server answers.
    pub async fn connect(config: &MongoStoreConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri).await?;
        client
            .database(&config.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        info!(
            database = %config.database,
            collection = %config.collection,
            "Connected to MongoDB player store"
        );
        Ok(Self::new(&client, &config.database, &config.collection))
    }

    /// Create a store over an existing client.
    pub fn new(client: &Client, database_name: &str, collection_name: &str) -> Self {
        let players = client.database(database_name).collection(collection_name);
        Self { players }
    }
}

/// Encode an identifier the way the player documents store it.
pub(crate) fn id_to_bson(id: &str) -> Bson {
    match uuid::Uuid::parse_str(id) {
        Ok(uuid) => Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        }),
        Err(_) => Bson::String(id.to_string()),
    }
}

/// Decode a stored identifier. Unrecognized BSON types are skipped.
pub(crate) fn id_from_bson(value: &Bson) -> Option<String> {
    match value {
        Bson::String(s) => Some(s.clone()),
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes,
        }) => uuid::Uuid::from_slice(bytes)
            .ok()
            .map(|u| u.hyphenated().to_string()),
        _ => None,
    }
}

fn stored_version(doc: &Document) -> u64 {
    match doc.get(VERSION_FIELD) {
        Some(Bson::Int64(v)) => *v as u64,
        Some(Bson::Int32(v)) => *v as u64,
        _ => 0,
    }
}

/// Filter matching the player document at the expected library version.
pub(crate) fn version_filter(player_id: &PlayerId, version: u64) -> Document {
    let id = id_to_bson(player_id.as_str());
    if version == 0 {
        doc! {
            "_id": id,
            "$or": [
                { VERSION_FIELD: { "$exists": false } },
                { VERSION_FIELD: 0_i64 },
            ],
        }
    } else {
        doc! { "_id": id, VERSION_FIELD: version as i64 }
    }
}

#[async_trait]
impl PlayerStore for MongoPlayerStore {
    async fn load(&self, player_id: &PlayerId) -> Result<Option<PlayerLibrary>> {
        let filter = doc! { "_id": id_to_bson(player_id.as_str()) };

        let Some(document) = self.players.find_one(filter).await? else {
            return Ok(None);
        };

        let games = document
            .get_array(LIBRARY_FIELD)
            .map(|values| {
                values
                    .iter()
                    .filter_map(id_from_bson)
                    .map(GameId::new)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(PlayerLibrary {
            player_id: player_id.clone(),
            games,
            version: stored_version(&document),
        }))
    }

    async fn save(&self, library: &PlayerLibrary) -> Result<()> {
        let filter = version_filter(&library.player_id, library.version);
        let games: Vec<Bson> = library
            .games
            .iter()
            .map(|g| id_to_bson(g.as_str()))
            .collect();

        let update = doc! {
            "$set": {
                LIBRARY_FIELD: games,
                VERSION_FIELD: (library.version + 1) as i64,
            }
        };

        let result = self.players.update_one(filter, update).await?;

        if result.matched_count == 0 {
            debug!(
                player_id = %library.player_id,
                expected = library.version,
                "Player document changed or vanished since load"
            );
            return Err(LibraryError::Conflict {
                player_id: library.player_id.clone(),
                expected: library.version,
            });
        }

        Ok(())
    }
}
