//! Tick resolution: movement, collisions and dot consumption.
//!
//! All checks run against the board as it was before the tick, so the order
//! in which players are processed never changes the outcome.

use std::collections::HashMap;

use protocol::Point;
use rand::Rng;
use tracing::debug;

use crate::board::{Board, Occupancy};
use crate::player::PlayerDirectory;

/// Why a player was removed during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elimination {
    /// Head left the board.
    OutOfBounds,
    /// Head ran into the player's own body.
    SelfCollision,
    /// Head ran into another player's body.
    BodyCollision,
    /// Two or more heads entered the same cell.
    HeadOn,
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Eliminated players, sorted by id.
    pub eliminated: Vec<(String, Elimination)>,
    /// Players that ate the dot this tick.
    pub grew: Vec<String>,
    /// Whether the dot was consumed and placed again.
    pub dot_respawned: bool,
}

struct PlannedMove {
    id: String,
    head: Point,
    grows: bool,
}

/// Advance every live player by one step.
pub fn resolve_tick(
    board: &mut Board,
    players: &mut PlayerDirectory,
    rng: &mut impl Rng,
) -> TickOutcome {
    let mut outcome = TickOutcome::default();

    let mut occupied = board.occupancy();
    occupied.extend(players.segments());

    let mut planned = Vec::with_capacity(players.len());
    for id in players.sorted_ids() {
        let Some(player) = players.get_mut(&id) else {
            continue;
        };
        let Some(direction) = player.next_direction() else {
            continue;
        };
        player.heading = Some(direction);
        player.pending = None;
        let Some(head) = player.head() else {
            continue;
        };
        let next = head + direction.delta();
        planned.push(PlannedMove {
            grows: board.dot == Some(next),
            head: next,
            id,
        });
    }

    let mut heads: HashMap<Point, usize> = HashMap::with_capacity(planned.len());
    for mv in &planned {
        *heads.entry(mv.head).or_insert(0) += 1;
    }

    let mut survivors = Vec::with_capacity(planned.len());
    for mv in planned {
        match check_move(board, players, &occupied, &heads, &mv) {
            Some(reason) => outcome.eliminated.push((mv.id, reason)),
            None => survivors.push(mv),
        }
    }

    for (id, reason) in &outcome.eliminated {
        debug!("Board {}: {} eliminated ({:?})", board.id, id, reason);
        players.eliminate(id);
    }

    let mut dot_eaten = false;
    for mv in survivors {
        let Some(player) = players.get_mut(&mv.id) else {
            continue;
        };
        player.body.push_front(mv.head);
        if mv.grows {
            dot_eaten = true;
            outcome.grew.push(mv.id);
        } else {
            player.body.pop_back();
        }
    }

    if dot_eaten {
        let mut occupied = board.occupancy();
        occupied.extend(players.segments());
        board.dot = occupied.random_free(rng);
        outcome.dot_respawned = true;
    }

    outcome
}

fn check_move(
    board: &Board,
    players: &PlayerDirectory,
    occupied: &Occupancy,
    heads: &HashMap<Point, usize>,
    mv: &PlannedMove,
) -> Option<Elimination> {
    if !board.contains(mv.head) {
        return Some(Elimination::OutOfBounds);
    }

    if occupied.contains(mv.head) {
        let own = players.get(&mv.id).map(|p| &p.body);
        if let Some(body) = own {
            if body.contains(&mv.head) {
                // The tail moves out of the way unless the snake grows this tick.
                let vacating = !mv.grows && body.back() == Some(&mv.head);
                if !vacating {
                    return Some(Elimination::SelfCollision);
                }
            } else {
                return Some(Elimination::BodyCollision);
            }
        }
    }

    if heads.get(&mv.head).copied().unwrap_or(0) > 1 {
        return Some(Elimination::HeadOn);
    }

    None
}
