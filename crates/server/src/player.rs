//! Player directory.
//!
//! Plain data owned by a game session; every access happens inside the
//! session actor, so nothing here is synchronized.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use protocol::packets::PlayerPayload;
use protocol::{Color, Direction, Point};

/// A live snake.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub color: Color,
    /// Segments, head first. Empty until the board starts.
    pub body: VecDeque<Point>,
    /// Direction applied on the last tick. `None` until the first move.
    pub heading: Option<Direction>,
    /// Direction requested since the last tick.
    pub pending: Option<Direction>,
}

impl Player {
    pub fn new(id: impl Into<String>, color: Color) -> Self {
        Self {
            id: id.into(),
            color,
            body: VecDeque::new(),
            heading: None,
            pending: None,
        }
    }

    pub fn head(&self) -> Option<Point> {
        self.body.front().copied()
    }

    /// Place a single-segment body at `cell`.
    pub fn seed(&mut self, cell: Point) {
        self.body.clear();
        self.body.push_back(cell);
        self.heading = None;
        self.pending = None;
    }

    /// Queue a direction for the next tick.
    ///
    /// Once the snake has a neck, turning straight back against the current
    /// heading is dropped. Returns whether the input was accepted.
    pub fn steer(&mut self, direction: Direction) -> bool {
        if self.body.len() > 1 && self.heading == Some(direction.opposite()) {
            return false;
        }
        self.pending = Some(direction);
        true
    }

    /// Direction the snake moves on the next tick, if any.
    pub fn next_direction(&self) -> Option<Direction> {
        self.pending.or(self.heading)
    }

    pub fn to_payload(&self) -> PlayerPayload {
        PlayerPayload {
            body: self.body.iter().map(|p| p.to_array()).collect(),
            color: self.color,
        }
    }
}

/// Live players of one board, plus the ids eliminated from it.
#[derive(Debug, Default)]
pub struct PlayerDirectory {
    players: HashMap<String, Player>,
    eliminated: HashSet<String>,
    joins: usize,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new player with the next palette color.
    ///
    /// Returns `None` if the id is already live; the existing entry is kept.
    pub fn add(&mut self, id: &str) -> Option<&mut Player> {
        if self.players.contains_key(id) {
            return None;
        }
        let color = Color::nth(self.joins);
        self.joins += 1;
        Some(
            self.players
                .entry(id.to_string())
                .or_insert_with(|| Player::new(id, color)),
        )
    }

    pub fn remove(&mut self, id: &str) -> Option<Player> {
        self.players.remove(id)
    }

    /// Drop a player from the live mapping and remember the elimination.
    pub fn eliminate(&mut self, id: &str) -> Option<Player> {
        let player = self.players.remove(id)?;
        self.eliminated.insert(player.id.clone());
        Some(player)
    }

    pub fn is_eliminated(&self, id: &str) -> bool {
        self.eliminated.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Ids sorted, so tick resolution and spawning do not depend on hash order.
    pub fn sorted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.players.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All occupied cells.
    pub fn segments(&self) -> impl Iterator<Item = &Point> {
        self.players.values().flat_map(|p| p.body.iter())
    }

    /// Client-facing `players` mapping.
    pub fn to_payload(&self) -> BTreeMap<String, PlayerPayload> {
        self.players
            .iter()
            .map(|(id, p)| (id.clone(), p.to_payload()))
            .collect()
    }
}
