//! Game simulation modules

pub mod court;
pub mod room;
pub mod sim;

pub use court::GameMode;
pub use room::{GameRoom, RoomCommand, RoomHandle, RoomState};
pub use sim::SimState;
