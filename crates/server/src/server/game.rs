//! Game session state and its actor loop.
//!
//! A [`GameSession`] owns one board. It is only ever touched by the task
//! running [`run_session`], which drains the session mailbox one command at a
//! time and interleaves ticks and the idle check in the same loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use protocol::packets::UpdatePayload;
use protocol::Direction;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, info};

use crate::board::Board;
use crate::collision::{self, TickOutcome};
use crate::config::Config;
use crate::error::SessionError;
use crate::player::PlayerDirectory;

use super::gateway::{BoardEvent, Subscription, Topic};

/// Lifecycle of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting players; nothing moves.
    Waiting,
    /// Ticking.
    Running,
    /// Every snake has been eliminated; ticking has stopped.
    Finished,
}

/// Per-session settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cols: u32,
    pub rows: u32,
    pub max_players: usize,
    /// `None` disables the timer; ticks then only come from [`SessionCommand::Tick`].
    pub tick_interval: Option<Duration>,
    /// `None` keeps idle sessions alive.
    pub idle_timeout: Option<Duration>,
    pub mailbox_capacity: usize,
    pub broadcast_capacity: usize,
    pub seed: Option<u64>,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        let session = &config.session;
        Self {
            cols: config.board.cols,
            rows: config.board.rows,
            max_players: config.board.max_players,
            tick_interval: (session.tick_interval_ms > 0)
                .then(|| Duration::from_millis(session.tick_interval_ms)),
            idle_timeout: (session.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(session.idle_timeout_secs)),
            mailbox_capacity: session.mailbox_capacity,
            broadcast_capacity: session.broadcast_capacity,
            seed: session.seed,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Reply to a successful join.
#[derive(Debug)]
pub struct Joined {
    pub board_id: String,
    /// Subscription taken before the join's own `update` was published.
    pub events: Subscription,
}

/// Point-in-time view of a session, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub members: usize,
    pub ticks: u64,
    pub board: UpdatePayload,
}

/// Authoritative state of one board.
pub struct GameSession {
    board: Board,
    players: PlayerDirectory,
    /// Connected player ids, live or not, with how many channels each one
    /// has attached. The session ends when this empties.
    members: HashMap<String, usize>,
    max_players: usize,
    phase: Phase,
    ticks: u64,
    rng: StdRng,
    topic: Topic,
}

impl GameSession {
    pub fn new(board_id: &str, settings: &SessionSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            board: Board::new(board_id, settings.cols, settings.rows),
            players: PlayerDirectory::new(),
            members: HashMap::new(),
            max_players: settings.max_players,
            phase: Phase::Waiting,
            ticks: 0,
            rng,
            topic: Topic::new(board_id, settings.broadcast_capacity),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn players(&self) -> &PlayerDirectory {
        &self.players
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Add a player (or re-attach an already connected one) and publish `update`.
    pub fn join(&mut self, player_id: &str) -> Result<Joined, SessionError> {
        if player_id.trim().is_empty() {
            return Err(SessionError::InvalidPlayerId);
        }

        match self.members.get_mut(player_id) {
            Some(attached) => *attached += 1,
            None => {
                if self.members.len() >= self.max_players {
                    return Err(SessionError::BoardFull);
                }
                self.admit(player_id)?;
                self.members.insert(player_id.to_string(), 1);
                info!(
                    "Board {}: {} joined ({} players)",
                    self.board.id,
                    player_id,
                    self.members.len()
                );
            }
        }

        let events = self.topic.subscribe();
        self.publish_update();
        Ok(Joined {
            board_id: self.board.id.clone(),
            events,
        })
    }

    fn admit(&mut self, player_id: &str) -> Result<(), SessionError> {
        if self.players.contains(player_id) || self.players.is_eliminated(player_id) {
            // Eliminated players come back as spectators.
            return Ok(());
        }
        if !self.board.started {
            self.players.add(player_id);
            return Ok(());
        }

        // Late joiners drop straight onto a free cell.
        let mut occupied = self.board.occupancy();
        occupied.extend(self.players.segments());
        if let Some(dot) = self.board.dot {
            occupied.insert(dot);
        }
        let cell = occupied.random_free(&mut self.rng).ok_or(SessionError::BoardFull)?;
        if let Some(player) = self.players.add(player_id) {
            player.seed(cell);
        }
        if self.phase == Phase::Finished {
            info!("Board {}: resumed by late joiner {}", self.board.id, player_id);
            self.phase = Phase::Running;
        }
        Ok(())
    }

    /// Start the board. Only the first call has any effect.
    pub fn start(&mut self) -> bool {
        if self.board.started {
            return false;
        }

        let mut occupied = self.board.occupancy();
        for id in self.players.sorted_ids() {
            let Some(cell) = occupied.random_free(&mut self.rng) else {
                break;
            };
            occupied.insert(cell);
            if let Some(player) = self.players.get_mut(&id) {
                player.seed(cell);
            }
        }
        self.board.dot = occupied.random_free(&mut self.rng);
        self.board.started = true;
        self.phase = Phase::Running;

        info!(
            "Board {}: started with {} players",
            self.board.id,
            self.players.len()
        );
        self.topic.publish(BoardEvent::Started);
        self.publish_update();
        true
    }

    /// Queue a direction for a live player. Returns whether it was accepted.
    pub fn steer(&mut self, player_id: &str, direction: Direction) -> bool {
        if self.phase != Phase::Running {
            return false;
        }
        let Some(player) = self.players.get_mut(player_id) else {
            return false;
        };
        let accepted = player.steer(direction);
        if !accepted {
            debug!(
                "Board {}: ignored reversal {} from {}",
                self.board.id, direction, player_id
            );
        }
        accepted
    }

    /// Detach one channel of a player. The player is removed once its last
    /// channel detaches. Returns whether the session is now empty.
    pub fn leave(&mut self, player_id: &str) -> bool {
        if let Some(attached) = self.members.get_mut(player_id) {
            *attached -= 1;
            if *attached > 0 {
                debug!(
                    "Board {}: {} detached one channel, {} left",
                    self.board.id, player_id, attached
                );
                return false;
            }
        }
        let was_member = self.members.remove(player_id).is_some();
        let was_live = self.players.remove(player_id).is_some();
        if was_member || was_live {
            info!(
                "Board {}: {} left ({} players)",
                self.board.id,
                player_id,
                self.members.len()
            );
            self.publish_update();
        }
        self.is_empty()
    }

    /// Advance the board one step. Does nothing unless running.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        if self.phase != Phase::Running {
            return None;
        }

        let outcome = collision::resolve_tick(&mut self.board, &mut self.players, &mut self.rng);
        self.ticks += 1;
        for (id, reason) in &outcome.eliminated {
            info!("Board {}: {} eliminated ({:?})", self.board.id, id, reason);
        }
        self.publish_update();

        if self.players.is_empty() {
            info!(
                "Board {}: no snakes left after {} ticks, stopping",
                self.board.id, self.ticks
            );
            self.phase = Phase::Finished;
        }
        Some(outcome)
    }

    /// Client-facing board state.
    pub fn payload(&self) -> UpdatePayload {
        UpdatePayload {
            players: self.players.to_payload(),
            dot: self.board.dot.map(|p| p.to_array()),
            size: self.board.size(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            members: self.members.len(),
            ticks: self.ticks,
            board: self.payload(),
        }
    }

    fn publish_update(&self) {
        self.topic
            .publish(BoardEvent::Update(Arc::new(self.payload())));
    }

    /// Tell subscribers the session ended on purpose.
    fn close(&self) {
        self.topic.publish(BoardEvent::Closed);
    }
}

/// Messages accepted by a session mailbox.
#[derive(Debug)]
pub enum SessionCommand {
    Join {
        player_id: String,
        reply: oneshot::Sender<Result<Joined, SessionError>>,
    },
    Start,
    Move {
        player_id: String,
        direction: Direction,
    },
    Leave {
        player_id: String,
    },
    Tick,
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// Panic inside the actor.
    #[cfg(test)]
    Crash,
}

/// Cloneable address of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    board_id: Arc<str>,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(id: u64, board_id: &str, tx: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            id,
            board_id: Arc::from(board_id),
            tx,
        }
    }

    /// Unique per spawned session, so a replacement can be told apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }

    pub async fn join(&self, player_id: &str) -> Result<Joined, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Join {
            player_id: player_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Start).await
    }

    pub async fn steer(&self, player_id: &str, direction: Direction) -> Result<(), SessionError> {
        self.send(SessionCommand::Move {
            player_id: player_id.to_string(),
            direction,
        })
        .await
    }

    pub async fn leave(&self, player_id: &str) -> Result<(), SessionError> {
        self.send(SessionCommand::Leave {
            player_id: player_id.to_string(),
        })
        .await
    }

    /// Step the board by hand (used when the timer is disabled).
    pub async fn tick(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Tick).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    #[cfg(test)]
    pub(crate) async fn crash(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Crash).await
    }
}

/// Whether the actor keeps running after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

fn apply(session: &mut GameSession, command: SessionCommand) -> Flow {
    match command {
        SessionCommand::Join { player_id, reply } => {
            let result = session.join(&player_id);
            if let Err(e) = &result {
                debug!("Board {}: join by {} refused: {}", session.board_id(), player_id, e);
            }
            // The joiner may have given up waiting.
            let _ = reply.send(result);
        }
        SessionCommand::Start => {
            session.start();
        }
        SessionCommand::Move {
            player_id,
            direction,
        } => {
            session.steer(&player_id, direction);
        }
        SessionCommand::Leave { player_id } => {
            if session.leave(&player_id) {
                return Flow::Stop;
            }
        }
        SessionCommand::Tick => {
            session.tick();
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(session.snapshot());
        }
        #[cfg(test)]
        SessionCommand::Crash => panic!("board {} crashed on request", session.board_id()),
    }
    Flow::Continue
}

fn tick_timer(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn idle_deadline(last_activity: Instant, idle_timeout: Option<Duration>) {
    match idle_timeout {
        Some(timeout) => sleep_until(last_activity + timeout).await,
        None => std::future::pending().await,
    }
}

/// Run a session until it empties, idles out, or every handle is dropped.
pub async fn run_session(
    mut session: GameSession,
    mut mailbox: mpsc::Receiver<SessionCommand>,
    settings: SessionSettings,
) {
    let mut ticker: Option<Interval> = None;
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            command = mailbox.recv() => {
                let Some(command) = command else {
                    debug!("Board {}: mailbox closed", session.board_id());
                    break;
                };
                if !matches!(command, SessionCommand::Tick | SessionCommand::Snapshot { .. }) {
                    last_activity = Instant::now();
                }
                if apply(&mut session, command) == Flow::Stop {
                    info!("Board {}: last player left, closing session", session.board_id());
                    break;
                }
            }
            _ = next_tick(&mut ticker) => {
                session.tick();
            }
            _ = idle_deadline(last_activity, settings.idle_timeout) => {
                info!("Board {}: idle, closing session", session.board_id());
                break;
            }
        }

        // Keep the timer in step with the phase.
        if session.phase() == Phase::Running {
            if ticker.is_none() {
                ticker = settings.tick_interval.map(tick_timer);
            }
        } else {
            ticker = None;
        }
    }

    session.close();
}
