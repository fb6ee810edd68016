//! MongoDB player store integration tests using testcontainers.
//!
//! Run with: cargo test --test storage_mongodb --features mongodb -- --nocapture
//!
//! Tests share a single MongoDB container; each test works in its own
//! collection.

#![cfg(feature = "mongodb")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backon::ExponentialBuilder;
use gamelib::config::MongoStoreConfig;
use gamelib::envelope::{GameId, PlayerId};
use gamelib::library::{
    self, LibraryError, LibraryMutator, LibraryService, MongoPlayerStore, PlayerLibrary,
    PlayerStore,
};
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, Binary, Bson, Document};
use mongodb::{Client, Collection};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage,
};
use tokio::sync::OnceCell;

const DATABASE: &str = "gamelib_test";
const PLAYER: &str = "3f2b0c4e-8d7a-4c1b-9e55-0a6f3b2d1c90";

/// Shared MongoDB container and connection URI.
static MONGO: OnceCell<(ContainerAsync<GenericImage>, String)> = OnceCell::const_new();

/// Get the shared MongoDB URI, starting the container if needed.
async fn get_mongodb_uri() -> String {
    let (_, uri) = MONGO
        .get_or_init(|| async {
            println!("Starting shared MongoDB container...");
            start_mongodb().await
        })
        .await;
    uri.clone()
}

async fn start_mongodb() -> (ContainerAsync<GenericImage>, String) {
    let container = GenericImage::new("mongo", "7")
        .with_exposed_port(27017.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Waiting for connections"))
        .start()
        .await
        .expect("Failed to start mongodb container");

    let host_port = container
        .get_host_port_ipv4(27017)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let uri = format!("mongodb://{}:{}", host, host_port);
    println!("MongoDB available at: {}", uri);

    (container, uri)
}

/// Store, raw collection handle and config over a fresh collection.
async fn fresh_store(prefix: &str) -> (MongoPlayerStore, Collection<Document>, MongoStoreConfig) {
    let uri = get_mongodb_uri().await;
    let config = MongoStoreConfig {
        uri,
        database: DATABASE.to_string(),
        collection: format!("{}_{}", prefix, uuid::Uuid::new_v4().simple()),
    };
    let client = Client::with_uri_str(&config.uri)
        .await
        .expect("Failed to connect to MongoDB");
    let players = client
        .database(&config.database)
        .collection::<Document>(&config.collection);
    let store = MongoPlayerStore::new(&client, &config.database, &config.collection);
    (store, players, config)
}

fn uuid_bson(id: &str) -> Bson {
    let uuid = uuid::Uuid::parse_str(id).expect("test id is a uuid");
    Bson::Binary(Binary {
        subtype: BinarySubtype::Uuid,
        bytes: uuid.as_bytes().to_vec(),
    })
}

/// Insert a player document the way the account service creates it:
/// no `LibraryVersion` field.
async fn insert_player(players: &Collection<Document>, id: &str, library: Vec<Bson>) {
    players
        .insert_one(doc! { "_id": uuid_bson(id), "Name": "test player", "Library": library })
        .await
        .expect("Failed to insert player");
}

async fn raw_player(players: &Collection<Document>, id: &str) -> Document {
    players
        .find_one(doc! { "_id": uuid_bson(id) })
        .await
        .expect("find_one failed")
        .expect("player document missing")
}

fn fast_retry(times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_max_times(times)
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_connect_pings_server() {
    let (_, players, config) = fresh_store("connect").await;
    insert_player(&players, PLAYER, vec![]).await;

    let store = MongoPlayerStore::connect(&config)
        .await
        .expect("connect should succeed against a live server");

    let loaded = store.load(&PlayerId::new(PLAYER)).await.unwrap();
    assert!(loaded.is_some());
}

#[tokio::test]
async fn test_connect_fails_without_server() {
    let config = MongoStoreConfig {
        uri: "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=500".to_string(),
        database: DATABASE.to_string(),
        collection: "users".to_string(),
    };

    let result = MongoPlayerStore::connect(&config).await;
    assert!(matches!(result, Err(LibraryError::Persistence(_))));
}

// ============================================================================
// Load / Save
// ============================================================================

#[tokio::test]
async fn test_load_missing_player() {
    let (store, _, _) = fresh_store("missing").await;
    let player = PlayerId::new(PLAYER);

    assert!(store.load(&player).await.unwrap().is_none());

    let mutator = LibraryMutator::new(store);
    let result = mutator.add_to_library(&player, &[GameId::new("g1")]).await;
    assert!(matches!(result, Err(LibraryError::PlayerNotFound { .. })));
}

#[tokio::test]
async fn test_first_save_on_document_without_version() {
    let (store, players, _) = fresh_store("first_save").await;
    insert_player(&players, PLAYER, vec![]).await;
    let player = PlayerId::new(PLAYER);

    let loaded = store.load(&player).await.unwrap().unwrap();
    assert_eq!(loaded.version, 0);
    assert!(loaded.games.is_empty());

    store
        .save(&PlayerLibrary {
            games: vec![GameId::new("g1")],
            ..loaded
        })
        .await
        .unwrap();

    let raw = raw_player(&players, PLAYER).await;
    assert_eq!(raw.get_i64("LibraryVersion").ok(), Some(1));
    assert_eq!(raw.get_str("Name").ok(), Some("test player"));
}

#[tokio::test]
async fn test_library_array_round_trip() {
    let game = "a1b2c3d4-0000-4000-8000-00000000000f";
    let (store, players, _) = fresh_store("round_trip").await;
    insert_player(
        &players,
        PLAYER,
        vec![uuid_bson(game), Bson::String("legacy-1".into())],
    )
    .await;
    let player = PlayerId::new(PLAYER);

    let loaded = store.load(&player).await.unwrap().unwrap();
    assert_eq!(loaded.games, vec![GameId::new(game), GameId::new("legacy-1")]);

    store
        .save(&PlayerLibrary {
            games: vec![GameId::new(game), GameId::new("legacy-1"), GameId::new("g2")],
            ..loaded
        })
        .await
        .unwrap();

    let raw = raw_player(&players, PLAYER).await;
    let library = raw.get_array("Library").unwrap();
    assert_eq!(library[0], uuid_bson(game));
    assert_eq!(library[1], Bson::String("legacy-1".into()));
    assert_eq!(library[2], Bson::String("g2".into()));
}

#[tokio::test]
async fn test_stale_version_save_conflicts() {
    let (store, players, _) = fresh_store("stale").await;
    insert_player(&players, PLAYER, vec![]).await;
    let player = PlayerId::new(PLAYER);

    let first = store.load(&player).await.unwrap().unwrap();
    let second = first.clone();

    store
        .save(&PlayerLibrary {
            games: vec![GameId::new("g1")],
            ..first
        })
        .await
        .unwrap();

    let result = store
        .save(&PlayerLibrary {
            games: vec![GameId::new("g2")],
            ..second
        })
        .await;
    assert!(matches!(result, Err(LibraryError::Conflict { expected: 0, .. })));

    let reloaded = store.load(&player).await.unwrap().unwrap();
    assert_eq!(reloaded.games, vec![GameId::new("g1")]);
    assert_eq!(reloaded.version, 1);
}

// ============================================================================
// Mutator over MongoDB
// ============================================================================

#[tokio::test]
async fn test_add_then_redeliver_keeps_one_entry_per_game() {
    let (store, players, _) = fresh_store("redeliver").await;
    insert_player(&players, PLAYER, vec![]).await;
    let mutator = LibraryMutator::new(store).with_retry(fast_retry(3));
    let player = PlayerId::new(PLAYER);
    let grant = [GameId::new("g1"), GameId::new("g2")];

    mutator.add_to_library(&player, &grant).await.unwrap();
    mutator.add_to_library(&player, &grant).await.unwrap();

    let raw = raw_player(&players, PLAYER).await;
    assert_eq!(raw.get_array("Library").unwrap().len(), 2);
    assert_eq!(raw.get_i64("LibraryVersion").ok(), Some(2));
}

#[tokio::test]
async fn test_uppercase_uuid_redelivery_keeps_one_entry() {
    let (store, players, _) = fresh_store("uppercase").await;
    insert_player(&players, PLAYER, vec![]).await;
    let mutator = LibraryMutator::new(store).with_retry(fast_retry(3));

    // Same player and game, spelled differently on each delivery.
    let first_player = PlayerId::new("3F2B0C4E-8D7A-4C1B-9E55-0A6F3B2D1C90");
    let second_player = PlayerId::new("{3f2b0c4e-8d7a-4c1b-9e55-0a6f3b2d1c90}");
    let game = "A1B2C3D4-0000-4000-8000-00000000000F";

    mutator
        .add_to_library(&first_player, &[GameId::new(game)])
        .await
        .unwrap();
    mutator
        .add_to_library(&second_player, &[GameId::new(game)])
        .await
        .unwrap();
    mutator
        .add_to_library(&second_player, &[GameId::new(game.to_lowercase())])
        .await
        .unwrap();

    let raw = raw_player(&players, PLAYER).await;
    let library = raw.get_array("Library").unwrap();
    assert_eq!(library, &vec![uuid_bson(game)]);

    let games = mutator.player_games(&first_player).await.unwrap();
    assert_eq!(games, vec![GameId::new("a1b2c3d4-0000-4000-8000-00000000000f")]);
}

/// Deletes the player document right after the first load, so the
/// following save finds nothing to update.
struct VanishingStore {
    inner: MongoPlayerStore,
    players: Collection<Document>,
    vanished: AtomicBool,
}

#[async_trait]
impl PlayerStore for VanishingStore {
    async fn load(&self, player_id: &PlayerId) -> library::Result<Option<PlayerLibrary>> {
        let loaded = self.inner.load(player_id).await?;
        if !self.vanished.swap(true, Ordering::SeqCst) {
            self.players
                .delete_one(doc! { "_id": uuid_bson(player_id.as_str()) })
                .await
                .map_err(|e| LibraryError::Persistence(e.to_string()))?;
        }
        Ok(loaded)
    }

    async fn save(&self, library: &PlayerLibrary) -> library::Result<()> {
        self.inner.save(library).await
    }
}

#[tokio::test]
async fn test_player_deleted_between_load_and_save() {
    let (inner, players, _) = fresh_store("vanish").await;
    insert_player(&players, PLAYER, vec![]).await;
    let store = VanishingStore {
        inner,
        players: players.clone(),
        vanished: AtomicBool::new(false),
    };
    let player = PlayerId::new(PLAYER);

    // Direct save after the document vanished reports a conflict.
    let loaded = store.load(&player).await.unwrap().unwrap();
    let result = store
        .save(&PlayerLibrary {
            games: vec![GameId::new("g1")],
            ..loaded
        })
        .await;
    assert!(matches!(result, Err(LibraryError::Conflict { .. })));

    // The mutator reloads after the conflict and finds no player.
    insert_player(&players, PLAYER, vec![]).await;
    store.vanished.store(false, Ordering::SeqCst);
    let mutator = LibraryMutator::new(store).with_retry(fast_retry(3));

    let result = mutator.add_to_library(&player, &[GameId::new("g1")]).await;
    assert!(matches!(result, Err(LibraryError::PlayerNotFound { .. })));
    assert_eq!(players.count_documents(doc! {}).await.unwrap(), 0);
}
