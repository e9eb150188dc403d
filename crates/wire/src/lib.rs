//! Scorepad Wire Types
//!
//! This crate defines how a session is laid out in the shared key-value
//! store and the records stored at each path. Every device MUST decode the
//! store through these types so that all of them see the same roster.
//!
//! # Shared-State Layout
//!
//! ```text
//! games/{code}/players             -> ordered array of {id, name, scores[]}
//! games/{code}/hostId              -> string | null
//! games/{code}/clients/{deviceId}  -> {online: boolean}
//! games/{code}/pointsLimit         -> number | null
//! .info/connected                  -> boolean (per connection)
//! ```
//!
//! Finished games are archived with the Protobuf messages at the bottom of
//! this file.

#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use prost::Message;
use scorepad_rules::{Player, Score};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// Paths
// ============================================================================

/// Default root under which sessions are stored.
pub const GAMES_ROOT: &str = "games";

/// Substrate-provided connection flag. Not session-scoped.
pub const CONNECTED_PATH: &str = ".info/connected";

/// A slash-separated location in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// Parse `a/b/c`. Empty segments are dropped, so `/a//b/` equals `a/b`.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The connection-state path.
    pub fn connected() -> Self {
        Self::parse(CONNECTED_PATH)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Path with one more segment appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn is_connected_flag(&self) -> bool {
        *self == Self::connected()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Every path belonging to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    session: StorePath,
}

impl SessionPaths {
    pub fn new(root: &str, code: &str) -> Self {
        Self {
            session: StorePath::parse(root).child(code),
        }
    }

    /// The whole session subtree; the single subscription every device holds.
    pub fn session(&self) -> &StorePath {
        &self.session
    }

    pub fn players(&self) -> StorePath {
        self.session.child("players")
    }

    pub fn host_id(&self) -> StorePath {
        self.session.child("hostId")
    }

    pub fn points_limit(&self) -> StorePath {
        self.session.child("pointsLimit")
    }

    pub fn client(&self, device_id: &str) -> StorePath {
        self.session.child("clients").child(device_id)
    }

    pub fn client_online(&self, device_id: &str) -> StorePath {
        self.client(device_id).child("online")
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure to map between store values and records.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed session record: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ============================================================================
// Shared-State Records
// ============================================================================

/// Treat an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A player as stored under `players`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// The store drops empty arrays, so a fresh player has no `scores` key.
    #[serde(default, deserialize_with = "null_as_default")]
    pub scores: Vec<Score>,
}

/// Presence flag under `clients/{deviceId}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub online: bool,
}

/// The complete session subtree.
///
/// Every field is optional on decode: a code nobody has written to yet
/// decodes to the empty session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub players: Vec<PlayerRecord>,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clients: BTreeMap<String, PresenceRecord>,
    #[serde(default)]
    pub points_limit: Option<i64>,
}

impl SessionRecord {
    /// Decode a snapshot of the session subtree.
    pub fn decode(value: &Value) -> Result<Self, WireError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Points limit, if set to a positive value.
    pub fn points_limit(&self) -> Option<u32> {
        self.points_limit
            .and_then(|n| u32::try_from(n).ok())
            .filter(|&n| n > 0)
    }

    /// Whether `device_id` is flagged online.
    pub fn is_online(&self, device_id: &str) -> bool {
        self.clients.get(device_id).is_some_and(|c| c.online)
    }

    /// Decoded roster, in stored order.
    pub fn roster(&self) -> Vec<Player> {
        self.players.iter().cloned().map(Player::from).collect()
    }
}

/// Only the fields host election reads: `hostId` and `clients`.
///
/// Decodes independently of the roster, so a malformed `players` entry does
/// not hide who is hosting or online.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRecord {
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clients: BTreeMap<String, PresenceRecord>,
}

impl ControlRecord {
    pub fn decode(value: &Value) -> Result<Self, WireError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl From<PlayerRecord> for Player {
    fn from(record: PlayerRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            scores: record.scores,
        }
    }
}

impl From<&Player> for PlayerRecord {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            scores: player.scores.clone(),
        }
    }
}

/// Encode a complete roster for a whole-list overwrite of `players`.
pub fn players_value(players: &[Player]) -> Result<Value, WireError> {
    let records: Vec<PlayerRecord> = players.iter().map(PlayerRecord::from).collect();
    Ok(serde_json::to_value(records)?)
}

/// Encode a points limit; `None` clears the key.
pub fn points_limit_value(points_limit: Option<u32>) -> Value {
    points_limit.map_or(Value::Null, Value::from)
}

// ============================================================================
// Archive Messages
// ============================================================================

/// Current archive format.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// A finished (or abandoned) game, frozen for later review.
#[derive(Clone, PartialEq, Message)]
pub struct GameArchive {
    #[prost(uint32, tag = "1")]
    pub format_version: u32,

    /// Session code the game was played under.
    #[prost(string, tag = "2")]
    pub session_code: String,

    /// Points limit in force, if any.
    #[prost(uint32, optional, tag = "3")]
    pub points_limit: Option<u32>,

    /// Players in roster order.
    #[prost(message, repeated, tag = "4")]
    pub players: Vec<ArchivedPlayer>,

    /// Fewest rounds recorded by any player.
    #[prost(uint32, tag = "5")]
    pub rounds: u32,

    /// Winner under the points limit, if the game was won.
    #[prost(string, optional, tag = "6")]
    pub winner_id: Option<String>,

    /// Lowercase hex SHA-256 of this message encoded with `checksum` empty.
    #[prost(string, tag = "7")]
    pub checksum: String,
}

/// A player inside an archive.
#[derive(Clone, PartialEq, Message)]
pub struct ArchivedPlayer {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(sint64, repeated, tag = "3")]
    pub scores: Vec<i64>,
}

impl From<&Player> for ArchivedPlayer {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            scores: player.scores.clone(),
        }
    }
}

impl From<ArchivedPlayer> for Player {
    fn from(archived: ArchivedPlayer) -> Self {
        Self {
            id: archived.id,
            name: archived.name,
            scores: archived.scores,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_paths() {
        let paths = SessionPaths::new(GAMES_ROOT, "abcxy");
        assert_eq!(paths.session().to_string(), "games/abcxy");
        assert_eq!(paths.players().to_string(), "games/abcxy/players");
        assert_eq!(paths.host_id().to_string(), "games/abcxy/hostId");
        assert_eq!(
            paths.client_online("dev1").to_string(),
            "games/abcxy/clients/dev1/online"
        );
        assert_eq!(paths.points_limit().to_string(), "games/abcxy/pointsLimit");
    }

    #[test]
    fn test_store_path_parse_drops_empty_segments() {
        assert_eq!(StorePath::parse("/a//b/"), StorePath::parse("a/b"));
        assert!(StorePath::parse(".info/connected").is_connected_flag());
    }

    #[test]
    fn test_control_decodes_past_malformed_roster() {
        let value = json!({
            "players": [{"id": "p", "name": "P", "scores": [1.5]}],
            "hostId": "dev1",
            "clients": {"dev1": {"online": false}, "dev2": {"online": true}}
        });
        assert!(SessionRecord::decode(&value).is_err());

        let control = ControlRecord::decode(&value).unwrap();
        assert_eq!(control.host_id.as_deref(), Some("dev1"));
        assert!(!control.clients["dev1"].online);
        assert!(control.clients["dev2"].online);
    }

    #[test]
    fn test_decode_null_is_empty_session() {
        let record = SessionRecord::decode(&Value::Null).unwrap();
        assert!(record.players.is_empty());
        assert!(record.host_id.is_none());
        assert!(record.clients.is_empty());
        assert_eq!(record.points_limit(), None);
    }

    #[test]
    fn test_decode_full_session() {
        let value = json!({
            "players": [
                {"id": "p1", "name": "Ann", "scores": [10, 20]},
                {"id": "p2", "name": "Bob"}
            ],
            "hostId": "dev1",
            "clients": {"dev1": {"online": true}, "dev2": {"online": false}},
            "pointsLimit": 75
        });
        let record = SessionRecord::decode(&value).unwrap();
        let roster = record.roster();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].scores, vec![10, 20]);
        assert!(roster[1].scores.is_empty());
        assert_eq!(record.host_id.as_deref(), Some("dev1"));
        assert!(record.is_online("dev1"));
        assert!(!record.is_online("dev2"));
        assert!(!record.is_online("dev3"));
        assert_eq!(record.points_limit(), Some(75));
    }

    #[test]
    fn test_decode_non_positive_limit_is_unlimited() {
        let record = SessionRecord::decode(&json!({"pointsLimit": 0})).unwrap();
        assert_eq!(record.points_limit(), None);
        let record = SessionRecord::decode(&json!({"pointsLimit": null})).unwrap();
        assert_eq!(record.points_limit(), None);
    }

    #[test]
    fn test_decode_malformed_is_error() {
        let result = SessionRecord::decode(&json!({"players": "nope"}));
        assert!(matches!(result, Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_players_value_preserves_order() {
        let players = vec![
            Player {
                id: "z".to_string(),
                name: "Zed".to_string(),
                scores: vec![3],
            },
            Player::new("a", "Ann"),
        ];
        let value = players_value(&players).unwrap();
        let record = SessionRecord::decode(&json!({ "players": value })).unwrap();
        assert_eq!(record.roster(), players);
    }

    #[test]
    fn test_points_limit_value() {
        assert_eq!(points_limit_value(None), Value::Null);
        assert_eq!(points_limit_value(Some(50)), json!(50));
    }

    #[test]
    fn test_archive_encoding() {
        let archive = GameArchive {
            format_version: ARCHIVE_FORMAT_VERSION,
            session_code: "abcxy".to_string(),
            points_limit: Some(50),
            players: vec![ArchivedPlayer {
                id: "p1".to_string(),
                name: "Ann".to_string(),
                scores: vec![-5, 60],
            }],
            rounds: 2,
            winner_id: Some("p1".to_string()),
            checksum: String::new(),
        };
        let bytes = archive.encode_to_vec();
        let decoded = GameArchive::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, archive);
    }
}
