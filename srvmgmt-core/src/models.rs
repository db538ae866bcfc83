//! Data types exchanged with management clients.
//!
//! Every type here is serialized onto the wire as-is and described in the discovery document by
//! its [`JsonSchema`] implementation, so field names are part of the protocol.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reference to a player, by profile id, by name, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Player {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Player {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// Whether `self` and `other` refer to the same player.
    ///
    /// Ids win when both sides have one.  Otherwise names are compared case-insensitively, which
    /// is how player names are matched everywhere in the game.
    pub fn refers_to(&self, other: &Player) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => match (&self.name, &other.name) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UserBan {
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// RFC 3339 timestamp; absent means the ban never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IpBan {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KickPlayer {
    pub player: Player,
    /// Shown to the player as the disconnect reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The value of a game rule.  Rules are either flags or integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum GameRuleValue {
    Boolean(bool),
    Integer(i64),
}

impl GameRuleValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            GameRuleValue::Boolean(_) => "boolean",
            GameRuleValue::Integer(_) => "integer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GameRule {
    pub key: String,
    pub value: GameRuleValue,
}

impl GameRule {
    pub fn new(key: impl Into<String>, value: GameRuleValue) -> Self {
        Self { key: key.into(), value }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Version {
    pub name: String,
    pub protocol: i32,
}

/// Snapshot of the server's overall state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServerState {
    pub started: bool,
    pub players: Vec<Player>,
    pub version: Version,
}

/// A message broadcast to players in chat (or in the action bar when `overlay` is set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SystemMessage {
    pub message: String,
    #[serde(default)]
    pub overlay: bool,
    /// When absent the message goes to every online player
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiving_players: Option<Vec<Player>>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Difficulty {
    Peaceful,
    Easy,
    Normal,
    Hard,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn player_omits_missing_fields() {
        assert_eq!(serde_json::to_value(Player::named("alex")).unwrap(), json!({"name": "alex"}));

        let player: Player = serde_json::from_value(json!({"id": "853c80ef-3c37-49fd-aa49-938b674adae6"})).unwrap();
        assert_eq!(player.name, None);
        assert!(player.id.is_some());
    }

    #[test]
    fn player_identity() {
        let id = Uuid::from_u128(7);
        let by_id = Player::new(id, "Steve");

        assert!(by_id.refers_to(&Player::named("steve")));
        assert!(by_id.refers_to(&Player { id: Some(id), name: None }));
        assert!(!by_id.refers_to(&Player::new(Uuid::from_u128(8), "Steve")));
        assert!(!Player::default().refers_to(&Player::default()));
    }

    #[test]
    fn game_rule_values_are_untagged() {
        let rule: GameRule = serde_json::from_value(json!({"key": "doDaylightCycle", "value": false})).unwrap();
        assert_eq!(rule.value, GameRuleValue::Boolean(false));

        let rule: GameRule = serde_json::from_value(json!({"key": "randomTickSpeed", "value": 3})).unwrap();
        assert_eq!(rule.value, GameRuleValue::Integer(3));
        assert_eq!(rule.value.type_name(), "integer");

        assert!(serde_json::from_value::<GameRule>(json!({"key": "x", "value": "three"})).is_err());
    }

    #[test]
    fn difficulty_names_match_between_serde_and_strum() {
        for difficulty in Difficulty::iter() {
            let wire = serde_json::to_value(difficulty).unwrap();
            assert_eq!(wire, json!(difficulty.to_string()));
            assert_eq!(Difficulty::from_str(&difficulty.to_string()).unwrap(), difficulty);
        }
    }

    #[test]
    fn system_message_defaults() {
        let message: SystemMessage = serde_json::from_value(json!({"message": "restart in 5"})).unwrap();
        assert!(!message.overlay);
        assert_eq!(message.receiving_players, None);
    }
}
