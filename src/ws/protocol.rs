//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Command, MatchSnapshot, PlayerId, WeaponKind};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Spawn into a match and subscribe to its state topic
    Join {
        match_id: Uuid,
        player_id: PlayerId,
        #[serde(default)]
        username: Option<String>,
    },

    /// Movement delta plus facing
    Move {
        match_id: Uuid,
        player_id: PlayerId,
        delta_x: f32,
        delta_y: f32,
        rotation: f32,
    },

    /// Fire the current weapon
    Shoot {
        match_id: Uuid,
        player_id: PlayerId,
        /// Heading in radians
        direction: f32,
    },

    Respawn {
        match_id: Uuid,
        player_id: PlayerId,
    },

    SwitchWeapon {
        match_id: Uuid,
        player_id: PlayerId,
        weapon: WeaponKind,
    },

    /// Leave the player's current match
    Leave { player_id: PlayerId },

    /// Add a bot. Defaults to the connection's current match.
    AddBot {
        #[serde(default)]
        match_id: Option<Uuid>,
    },

    RemoveBot {
        #[serde(default)]
        match_id: Option<Uuid>,
        bot_id: PlayerId,
    },

    /// Watch a match without playing in it
    Subscribe { match_id: Uuid },
}

impl ClientMsg {
    /// Player this message acts for, if any
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            ClientMsg::Join { player_id, .. }
            | ClientMsg::Move { player_id, .. }
            | ClientMsg::Shoot { player_id, .. }
            | ClientMsg::Respawn { player_id, .. }
            | ClientMsg::SwitchWeapon { player_id, .. }
            | ClientMsg::Leave { player_id } => Some(*player_id),
            ClientMsg::AddBot { .. } | ClientMsg::RemoveBot { .. } | ClientMsg::Subscribe { .. } => {
                None
            }
        }
    }

    /// Split a fire-and-forget gameplay message into its match and command
    pub fn into_gameplay(self) -> Option<(Uuid, Command)> {
        match self {
            ClientMsg::Move {
                match_id,
                player_id,
                delta_x,
                delta_y,
                rotation,
            } => Some((
                match_id,
                Command::Move {
                    player_id,
                    delta_x,
                    delta_y,
                    rotation,
                },
            )),
            ClientMsg::Shoot {
                match_id,
                player_id,
                direction,
            } => Some((
                match_id,
                Command::Shoot {
                    player_id,
                    direction,
                },
            )),
            ClientMsg::Respawn {
                match_id,
                player_id,
            } => Some((match_id, Command::Respawn { player_id })),
            ClientMsg::SwitchWeapon {
                match_id,
                player_id,
                weapon,
            } => Some((match_id, Command::SwitchWeapon { player_id, weapon })),
            _ => None,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        /// Authenticated player, when tokens are in use
        player_id: Option<PlayerId>,
        server_time: u64,
    },

    /// Now receiving state for this match
    Subscribed { match_id: Uuid },

    /// Snapshot of the subscribed match
    State(MatchSnapshot),

    /// Match retired; no further state will follow
    MatchEnded {
        match_id: Uuid,
        winner_name: Option<String>,
    },

    /// Command refused
    Error { code: String, message: String },
}
