//! Shared protocol crate for gridsnake.
//!
//! This crate contains:
//! - The channel frame codec (Phoenix V2 JSON arrays)
//! - Client event parsing and server event builders
//! - Shared types (Color, Direction, Point)

mod error;
mod frame;
pub mod packets;

pub use error::ProtocolError;
pub use frame::Frame;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A grid cell coordinate. `x` grows to the right, `y` grows downwards.
pub type Point = glam::IVec2;

/// Topic prefix for board channels (`game:<board_id>`).
pub const GAME_TOPIC_PREFIX: &str = "game:";

/// Topic used by the socket itself (heartbeats).
pub const SOCKET_TOPIC: &str = "phoenix";

/// Extract the board id from a `game:<board_id>` topic.
pub fn board_id_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(GAME_TOPIC_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Build the topic for a board id.
pub fn topic_for_board(board_id: &str) -> String {
    format!("{GAME_TOPIC_PREFIX}{board_id}")
}

/// Movement direction sent by `move` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit step on the grid.
    pub const fn delta(self) -> Point {
        match self {
            Direction::Up => Point::new(0, -1),
            Direction::Down => Point::new(0, 1),
            Direction::Left => Point::new(-1, 0),
            Direction::Right => Point::new(1, 0),
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl FromStr for Direction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(ProtocolError::UnknownDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snake color. Serialized as the lowercase name the client turns into a
/// `color-<name>` CSS class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
    Pink,
    Cyan,
}

impl Color {
    /// Fixed palette, handed out round-robin in join order.
    pub const PALETTE: [Color; 8] = [
        Color::Red,
        Color::Blue,
        Color::Green,
        Color::Yellow,
        Color::Purple,
        Color::Orange,
        Color::Pink,
        Color::Cyan,
    ];

    /// Color for the `n`th join on a board.
    pub const fn nth(n: usize) -> Self {
        Self::PALETTE[n % Self::PALETTE.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_parsing() {
        assert_eq!(board_id_from_topic("game:board-abc"), Some("board-abc"));
        assert_eq!(board_id_from_topic("game:"), None);
        assert_eq!(board_id_from_topic("lobby:x"), None);
        assert_eq!(topic_for_board("b1"), "game:b1");
    }

    #[test]
    fn test_direction_opposites() {
        for dir in [Direction::Up, Direction::Down, Direction::Left, Direction::Right] {
            assert_eq!(dir.opposite().opposite(), dir);
            assert_eq!(dir.delta() + dir.opposite().delta(), Point::ZERO);
        }
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_palette_wraps() {
        assert_eq!(Color::nth(0), Color::Red);
        assert_eq!(Color::nth(8), Color::Red);
        assert_eq!(Color::nth(9), Color::Blue);
        assert_eq!(serde_json::to_string(&Color::Purple).unwrap(), "\"purple\"");
    }
}
