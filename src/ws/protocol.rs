//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Update this player's paddle target coordinate. `y` is the paddle's
    /// movable coordinate: vertical paddles slide along the y axis, the
    /// horizontal paddles of crazy mode slide along x.
    Move { y: f32 },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Sent once to a newly assigned connection
    #[serde(rename_all = "camelCase")]
    Init {
        player_id: Uuid,
        player_number: usize,
        game_state: GameSnapshot,
        room_id: Uuid,
    },

    /// Sent to every slot when the room reaches capacity
    GameStart { message: String },

    /// Sent every tick while the match is running
    #[serde(rename_all = "camelCase")]
    Update { game_state: GameSnapshot },

    /// Sent right after a goal, before the serve delay
    Score { scores: Vec<u32> },

    /// Normal termination: a score/life threshold was crossed
    #[serde(rename_all = "camelCase")]
    End {
        message: String,
        final_score: Vec<u32>,
        game_over: bool,
    },

    /// Forced termination: a peer disconnected
    #[serde(rename_all = "camelCase")]
    GameEnd {
        message: String,
        force_disconnect: bool,
    },
}

/// Wire-shaped view of a room's simulation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub running: bool,
    /// Paddles in slot order (slot numbers are 1-based join order)
    pub players: Vec<PaddleSnapshot>,
    pub ball: BallSnapshot,
    /// Goals scored per slot in duel mode, lives remaining per slot in crazy mode
    pub scores: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleSnapshot {
    pub slot: usize,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallSnapshot {
    pub x: f32,
    pub y: f32,
    pub speed_x: f32,
    pub speed_y: f32,
}
