//! Envelope decoding for checkout-completed notifications.
//!
//! Checkout events reach the fulfillment queue through an SNS topic, so every
//! SQS message body is an SNS notification whose `Message` field holds the
//! domain event as a JSON-encoded string:
//!
//! ```text
//! outer envelope: { "Message": "<json-encoded inner payload>", ...other fields ignored }
//! inner payload:  { "UserId": "<uuid>", "GameIds": ["<uuid>", ...] }
//! ```
//!
//! Decoding is two-stage (outer envelope, then inner payload) and has no side
//! effects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type for envelope decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Errors that can occur while unwrapping a message body.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Envelope has no Message field")]
    MissingMessage,

    #[error("Malformed fulfillment payload: {0}")]
    MalformedPayload(String),

    #[error("Fulfillment payload has no UserId")]
    MissingPlayerId,
}

/// UUID-shaped ids (any case, braced, simple or URN form) are kept as
/// lowercase hyphenated text so one id always compares equal to itself.
fn canonical(id: String) -> String {
    match uuid::Uuid::parse_str(&id) {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => id,
    }
}

/// Identifier of a player (the buyer of a checkout).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(canonical(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> Self {
        id.0
    }
}

/// Identifier of a game listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct GameId(String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(canonical(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for GameId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<GameId> for String {
    fn from(id: GameId) -> Self {
        id.0
    }
}

/// SNS notification wrapper. Only `Message` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct SnsEnvelope {
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "MessageId", default)]
    pub message_id: Option<String>,
    #[serde(rename = "TopicArn", default)]
    pub topic_arn: Option<String>,
}

/// Wire shape of the inner payload.
#[derive(Debug, Serialize, Deserialize)]
struct CheckoutPayload {
    #[serde(rename = "UserId", default)]
    user_id: Option<String>,
    #[serde(rename = "GameIds", default)]
    game_ids: Option<Vec<String>>,
}

/// A completed checkout: the buyer and the games bought in one purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentEvent {
    pub player_id: PlayerId,
    pub game_ids: Vec<GameId>,
}

impl FulfillmentEvent {
    pub fn new(
        player_id: impl Into<String>,
        game_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            player_id: PlayerId::new(player_id),
            game_ids: game_ids.into_iter().map(GameId::new).collect(),
        }
    }

    /// Serialize to the SNS-wrapped wire format carried on the queue.
    pub fn to_envelope_body(&self) -> String {
        let payload = CheckoutPayload {
            user_id: Some(self.player_id.as_str().to_string()),
            game_ids: Some(self.game_ids.iter().map(|g| g.as_str().to_string()).collect()),
        };
        let inner = serde_json::to_string(&payload).unwrap_or_default();
        serde_json::json!({ "Type": "Notification", "Message": inner }).to_string()
    }
}

/// Unwrap an SNS envelope and decode the fulfillment event inside it.
pub fn decode(body: &str) -> Result<FulfillmentEvent> {
    let envelope: SnsEnvelope =
        serde_json::from_str(body).map_err(|e| DecodeError::MalformedEnvelope(e.to_string()))?;

    let inner = envelope.message.ok_or(DecodeError::MissingMessage)?;
    decode_payload(&inner)
}

/// Decode an already-unwrapped checkout payload.
pub fn decode_payload(inner: &str) -> Result<FulfillmentEvent> {
    let payload: CheckoutPayload =
        serde_json::from_str(inner).map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    let player_id = payload
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(DecodeError::MissingPlayerId)?;

    Ok(FulfillmentEvent {
        player_id: PlayerId::new(player_id),
        game_ids: payload
            .game_ids
            .unwrap_or_default()
            .into_iter()
            .map(GameId::new)
            .collect(),
    })
}
