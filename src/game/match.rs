//! Match state and authoritative tick loop

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::util::time::{tick_delta, tick_duration, Timer};
use crate::ws::protocol::ServerMsg;

use super::bot::BotBrain;
use super::combat::{CombatSystem, HitResult, Projectile, StepOutcome, Target, WeaponKind};
use super::entities::{EntityStore, PlayerId, BOT_ID_BASE};
use super::error::GameError;
use super::map::MapLayout;
use super::physics::PhysicsSystem;
use super::snapshot::SnapshotBuilder;

/// Pending commands a match will buffer before refusing more
const COMMAND_QUEUE_CAPACITY: usize = 1024;
/// Snapshots a subscriber may fall behind before it starts skipping
const SNAPSHOT_BUFFER: usize = 64;

/// How a match decides it is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinPolicy {
    /// Ends when at most one of two or more players is alive
    LastStanding,
    /// Ends when someone reaches this many kills
    KillLimit(u32),
    /// Never ends on its own
    Disabled,
}

impl FromStr for WinPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last_standing" => Ok(Self::LastStanding),
            "none" => Ok(Self::Disabled),
            other => other
                .strip_prefix("kills:")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .map(Self::KillLimit)
                .ok_or_else(|| format!("unknown win policy: {s}")),
        }
    }
}

/// Intent submitted to a match
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join {
        player_id: PlayerId,
        username: Option<String>,
    },
    Leave {
        player_id: PlayerId,
    },
    Move {
        player_id: PlayerId,
        delta_x: f32,
        delta_y: f32,
        rotation: f32,
    },
    Shoot {
        player_id: PlayerId,
        direction: f32,
    },
    Respawn {
        player_id: PlayerId,
    },
    SwitchWeapon {
        player_id: PlayerId,
        weapon: WeaponKind,
    },
    AddBot,
    RemoveBot {
        bot_id: PlayerId,
    },
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::Move { .. } => "move",
            Command::Shoot { .. } => "shoot",
            Command::Respawn { .. } => "respawn",
            Command::SwitchWeapon { .. } => "switch_weapon",
            Command::AddBot => "add_bot",
            Command::RemoveBot { .. } => "remove_bot",
        }
    }
}

/// Reply channel for commands whose caller waits on the outcome
pub type Reply = oneshot::Sender<Result<MatchInfo, GameError>>;

/// A command on its way into the match queue
#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: Command,
    pub reply: Option<Reply>,
}

/// Match metadata as the lobby surface sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    pub id: Uuid,
    pub name: String,
    pub map_id: String,
    pub max_players: usize,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub player_ids: Vec<PlayerId>,
    pub player_count: usize,
    pub game_over: bool,
    pub winner_name: Option<String>,
}

/// Why a match loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// Every human player left
    Empty,
    /// Nobody joined before the idle timeout
    Idle,
    /// Game over and the grace period ran out
    Finished,
    /// A tick panicked
    Crashed,
    /// Every handle was dropped
    Abandoned,
}

/// Match state (owned by match task)
pub struct MatchState {
    pub id: Uuid,
    pub name: String,
    pub map: Arc<MapLayout>,
    pub max_players: usize,
    pub win_policy: WinPolicy,
    pub max_bots: usize,
    pub created_at: DateTime<Utc>,
    pub tick: u64,
    /// Simulated seconds since creation
    pub clock: f32,
    pub dt: f32,
    pub store: EntityStore,
    pub bots: BTreeMap<PlayerId, BotBrain>,
    pub rng: ChaCha8Rng,
    /// Set once any human has joined
    pub had_human: bool,
    /// Match clock when the win condition was met
    pub game_over_at: Option<f32>,
    /// Membership or outcome changed since metadata was last published
    pub info_dirty: bool,
}

impl MatchState {
    pub fn new(
        id: Uuid,
        name: String,
        map: Arc<MapLayout>,
        max_players: usize,
        settings: &GameSettings,
        seed: u64,
    ) -> Self {
        Self {
            id,
            name,
            map,
            max_players,
            win_policy: settings.win_policy,
            max_bots: settings.max_bots,
            created_at: Utc::now(),
            tick: 0,
            clock: 0.0,
            dt: tick_delta(settings.tick_rate),
            store: EntityStore::new(),
            bots: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            had_human: false,
            game_over_at: None,
            info_dirty: true,
        }
    }

    pub fn human_count(&self) -> usize {
        self.store.players.keys().filter(|id| **id < BOT_ID_BASE).count()
    }

    /// Every human who joined has left again
    pub fn is_deserted(&self) -> bool {
        self.had_human && self.human_count() == 0
    }

    /// A match stops being active once it is won or its last human has left
    pub fn is_active(&self) -> bool {
        !self.store.game_over && !self.is_deserted()
    }

    pub fn info(&self) -> MatchInfo {
        MatchInfo {
            id: self.id,
            name: self.name.clone(),
            map_id: self.map.id.clone(),
            max_players: self.max_players,
            active: self.is_active(),
            created_at: self.created_at,
            player_ids: self.store.players.keys().copied().collect(),
            player_count: self.store.players.len(),
            game_over: self.store.game_over,
            winner_name: self.store.winner_name.clone(),
        }
    }

    /// Pick the map spawn point farthest from every living player
    pub fn pick_spawn_point(&mut self) -> (f32, f32) {
        let points = &self.map.spawn_points;
        if points.is_empty() {
            return (self.map.bounds.width / 2.0, self.map.bounds.height / 2.0);
        }

        let living: Vec<(f32, f32)> = self
            .store
            .players
            .values()
            .filter(|p| p.alive)
            .map(|p| (p.x, p.y))
            .collect();
        if living.is_empty() {
            return points[self.rng.gen_range(0..points.len())];
        }

        let clearance = |&(sx, sy): &(f32, f32)| {
            living
                .iter()
                .map(|(px, py)| (px - sx).powi(2) + (py - sy).powi(2))
                .fold(f32::INFINITY, f32::min)
        };
        points
            .iter()
            .copied()
            .max_by(|a, b| clearance(a).total_cmp(&clearance(b)))
            .unwrap_or(points[0])
    }

    /// Run a single simulation tick
    pub fn run_tick(&mut self) -> Vec<HitResult> {
        self.tick += 1;
        self.clock += self.dt;

        self.integrate_movement();
        let hits = self.update_projectiles();
        self.run_bots();
        self.check_win_condition();

        hits
    }

    /// Apply movement queued since the previous tick
    fn integrate_movement(&mut self) {
        let map = Arc::clone(&self.map);
        for player in self.store.players.values_mut() {
            let (dx, dy) = (player.pending_dx, player.pending_dy);
            player.pending_dx = 0.0;
            player.pending_dy = 0.0;
            if !player.alive || (dx == 0.0 && dy == 0.0) {
                continue;
            }

            let (x, y) =
                PhysicsSystem::integrate_move(player.x, player.y, dx, dy, &map.bounds, &map.walls);
            player.x = x;
            player.y = y;
        }
    }

    /// Advance projectiles and resolve hits
    fn update_projectiles(&mut self) -> Vec<HitResult> {
        // Nothing lands once a winner is declared
        if self.store.game_over {
            self.store.projectiles.clear();
            return Vec::new();
        }

        let mut hits = Vec::new();
        let ids: Vec<u64> = self.store.projectiles.keys().copied().collect();

        for id in ids {
            let Some(mut projectile) = self.store.remove_projectile(id) else {
                continue;
            };
            let targets: Vec<Target> = self
                .store
                .players
                .values()
                .filter(|p| p.alive)
                .map(|p| Target {
                    id: p.id,
                    x: p.x,
                    y: p.y,
                })
                .collect();

            match projectile.step(self.dt, self.clock, &targets, &self.map.walls, &self.map.bounds)
            {
                StepOutcome::Flying => {
                    self.store.projectiles.insert(id, projectile);
                }
                StepOutcome::HitPlayer(target_id) => {
                    hits.push(self.apply_hit(&projectile, target_id));
                }
                outcome => {
                    trace!(match_id = %self.id, projectile_id = id, ?outcome, "Projectile removed");
                }
            }
        }

        hits
    }

    /// Apply a projectile's damage to its target and credit the shooter
    pub fn apply_hit(&mut self, projectile: &Projectile, target_id: PlayerId) -> HitResult {
        let now = self.clock;
        let mut target_killed = false;

        if let Some(target) = self.store.players.get_mut(&target_id) {
            let was_alive = target.alive;
            let (new_health, dead) = CombatSystem::apply_damage(target.health, projectile.damage);
            target.set_health(new_health);

            if was_alive && dead {
                target_killed = true;
                target.deaths += 1;
                target.died_at = Some(now);
            }
        }

        if target_killed && projectile.owner_id != target_id {
            // The shooter may have left since firing
            if let Some(shooter) = self.store.players.get_mut(&projectile.owner_id) {
                shooter.kills += 1;
            }
        }

        if target_killed {
            info!(
                match_id = %self.id,
                killer = projectile.owner_id,
                victim = target_id,
                "Player killed"
            );
        }

        HitResult {
            projectile_id: projectile.id,
            shooter_id: projectile.owner_id,
            target_id,
            damage: projectile.damage,
            target_killed,
        }
    }

    /// Let every bot decide, then push its intents through regular intake
    fn run_bots(&mut self) {
        let bot_ids: Vec<PlayerId> = self.bots.keys().copied().collect();

        for bot_id in bot_ids {
            let Some(mut brain) = self.bots.remove(&bot_id) else {
                continue;
            };
            let intents = brain.plan(bot_id, &self.store, &self.map, self.clock, self.dt, &mut self.rng);
            self.bots.insert(bot_id, brain);

            for command in intents {
                if let Err(e) = self.apply(command) {
                    trace!(match_id = %self.id, bot_id, error = %e, "Bot intent refused");
                }
            }
        }
    }

    /// Check win condition
    fn check_win_condition(&mut self) {
        if self.store.game_over {
            return;
        }

        let winner = match self.win_policy {
            WinPolicy::Disabled => return,
            WinPolicy::LastStanding => {
                if self.store.players.len() < 2 || self.store.alive_count() > 1 {
                    return;
                }
                self.store
                    .players
                    .values()
                    .find(|p| p.alive)
                    .map(|p| p.username.clone())
            }
            WinPolicy::KillLimit(limit) => {
                match self
                    .store
                    .players
                    .values()
                    .filter(|p| p.kills >= limit)
                    .max_by(|a, b| a.kills.cmp(&b.kills).then(b.id.cmp(&a.id)))
                {
                    Some(p) => Some(p.username.clone()),
                    None => return,
                }
            }
        };

        info!(match_id = %self.id, winner = ?winner, "Match over");
        self.store.game_over = true;
        self.store.winner_name = winner;
        self.game_over_at = Some(self.clock);
        self.info_dirty = true;
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub name: String,
    command_tx: mpsc::Sender<CommandEnvelope>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    info: Arc<RwLock<MatchInfo>>,
}

impl MatchHandle {
    pub fn info(&self) -> MatchInfo {
        self.info.read().clone()
    }

    pub fn player_count(&self) -> usize {
        self.info.read().player_count
    }

    pub fn is_active(&self) -> bool {
        self.info.read().active
    }

    /// New receiver for this match's snapshot topic
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.snapshot_tx.subscribe()
    }

    /// Queue a command without waiting for its outcome
    pub fn submit(&self, command: Command) -> Result<(), GameError> {
        match self.command_tx.try_send(CommandEnvelope {
            command,
            reply: None,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(GameError::InvalidCommand(
                "match command queue is full".to_string(),
            )),
            Err(TrySendError::Closed(_)) => Err(GameError::MatchNotFound),
        }
    }

    /// Queue a command and wait for the tick that applies it
    pub async fn request(&self, command: Command) -> Result<MatchInfo, GameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(CommandEnvelope {
                command,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| GameError::MatchNotFound)?;

        reply_rx.await.map_err(|_| GameError::MatchNotFound)?
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
    names: DashMap<String, Uuid>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
            names: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<MatchHandle> {
        let id = *self.names.get(name)?;
        self.get(&id)
    }

    /// Register a handle, claiming its name
    pub fn insert(&self, handle: MatchHandle) -> Result<(), GameError> {
        match self.names.entry(handle.name.clone()) {
            Entry::Occupied(_) => Err(GameError::DuplicateName),
            Entry::Vacant(slot) => {
                slot.insert(handle.id);
                self.matches.insert(handle.id, handle);
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        let (_, handle) = self.matches.remove(id)?;
        self.names.remove_if(&handle.name, |_, owner| owner == id);
        Some(handle)
    }

    pub fn handles(&self) -> Vec<MatchHandle> {
        self.matches.iter().map(|m| m.value().clone()).collect()
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match
pub struct GameMatch {
    state: MatchState,
    settings: GameSettings,
    command_rx: mpsc::Receiver<CommandEnvelope>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    info: Arc<RwLock<MatchInfo>>,
    started: Instant,
}

impl GameMatch {
    /// Create a new match
    pub fn new(
        id: Uuid,
        name: String,
        map: Arc<MapLayout>,
        max_players: usize,
        settings: GameSettings,
    ) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_BUFFER);

        let state = MatchState::new(id, name, map, max_players, &settings, rand::random());
        let info = Arc::new(RwLock::new(state.info()));

        let handle = MatchHandle {
            id,
            name: state.name.clone(),
            command_tx,
            snapshot_tx: snapshot_tx.clone(),
            info: Arc::clone(&info),
        };

        let game_match = Self {
            snapshot_builder: SnapshotBuilder::new(settings.tick_rate, settings.snapshot_rate),
            state,
            settings,
            command_rx,
            snapshot_tx,
            info,
            started: Instant::now(),
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until the match retires
    pub async fn run(mut self) -> RetireReason {
        info!(
            match_id = %self.state.id,
            name = %self.state.name,
            map = %self.state.map.id,
            "Match started"
        );

        let budget = tick_duration(self.settings.tick_rate);
        let mut tick_interval = interval(budget);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tick_interval.tick().await;

            let timer = Timer::new();
            let was_over = self.state.store.game_over;

            // Commands and simulation share one critical section per tick
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let channel_open = self.process_commands();
                let hits = self.state.run_tick();
                (channel_open, hits)
            }));

            let (channel_open, hits) = match outcome {
                Ok(result) => result,
                Err(_) => {
                    error!(
                        match_id = %self.state.id,
                        tick = self.state.tick,
                        "Tick panicked, retiring match"
                    );
                    break RetireReason::Crashed;
                }
            };

            for hit in &hits {
                debug!(
                    match_id = %self.state.id,
                    projectile_id = hit.projectile_id,
                    shooter = hit.shooter_id,
                    target = hit.target_id,
                    damage = hit.damage,
                    killed = hit.target_killed,
                    "Projectile hit"
                );
            }

            if timer.elapsed() > budget {
                warn!(
                    match_id = %self.state.id,
                    tick = self.state.tick,
                    elapsed_us = timer.elapsed_micros(),
                    "Tick exceeded its budget"
                );
            }

            if self.state.info_dirty {
                self.publish_info();
            }

            if self.state.store.game_over && !was_over {
                self.snapshot_builder.force_next();
            }
            if self.snapshot_builder.should_send() {
                let snapshot = self.state.store.snapshot(self.state.tick);
                // No receivers is fine
                let _ = self.snapshot_tx.send(ServerMsg::State(snapshot));
            }

            if let Some(reason) = self.retire_reason(channel_open) {
                break reason;
            }
        };

        self.shutdown(reason);
        reason
    }

    /// Drain the command queue. Returns false once every sender is gone.
    fn process_commands(&mut self) -> bool {
        loop {
            match self.command_rx.try_recv() {
                Ok(envelope) => self.handle_command(envelope),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_command(&mut self, envelope: CommandEnvelope) {
        let CommandEnvelope { command, reply } = envelope;
        let label = command.label();
        let result = self.state.apply(command);

        match reply {
            Some(reply) => {
                // Callers may read the shared info right after the reply
                if self.state.info_dirty {
                    self.publish_info();
                }
                let _ = reply.send(result.map(|()| self.state.info()));
            }
            None => {
                if let Err(e) = result {
                    warn!(match_id = %self.state.id, command = label, error = %e, "Dropped command");
                }
            }
        }
    }

    fn publish_info(&mut self) {
        *self.info.write() = self.state.info();
        self.state.info_dirty = false;
        debug!(
            match_id = %self.state.id,
            players = self.state.store.players.len(),
            "Match info updated"
        );
    }

    fn retire_reason(&self, channel_open: bool) -> Option<RetireReason> {
        if !channel_open {
            return Some(RetireReason::Abandoned);
        }
        if self.state.is_deserted() {
            return Some(RetireReason::Empty);
        }
        if !self.state.had_human && self.started.elapsed() >= self.settings.idle_timeout {
            return Some(RetireReason::Idle);
        }
        match self.state.game_over_at {
            Some(at) if self.state.clock - at >= self.settings.game_over_grace.as_secs_f32() => {
                Some(RetireReason::Finished)
            }
            _ => None,
        }
    }

    /// Refuse whatever is still queued and tell subscribers the match is gone
    fn shutdown(&mut self, reason: RetireReason) {
        self.command_rx.close();
        while let Ok(envelope) = self.command_rx.try_recv() {
            if let Some(reply) = envelope.reply {
                let _ = reply.send(Err(GameError::MatchNotFound));
            }
        }

        let mut info = self.state.info();
        info.active = false;
        *self.info.write() = info;

        let _ = self.snapshot_tx.send(ServerMsg::MatchEnded {
            match_id: self.state.id,
            winner_name: self.state.store.winner_name.clone(),
        });

        info!(match_id = %self.state.id, ?reason, ticks = self.state.tick, "Match retired");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::combat::MAX_HEALTH;
    use crate::game::map::load_map;
    use std::time::Duration;

    pub(crate) fn test_state(max_players: usize, win_policy: WinPolicy) -> MatchState {
        let settings = GameSettings {
            win_policy,
            ..GameSettings::default()
        };
        MatchState::new(
            Uuid::new_v4(),
            "test".to_string(),
            load_map("Map1").unwrap(),
            max_players,
            &settings,
            7,
        )
    }

    fn place(state: &mut MatchState, id: PlayerId, x: f32, y: f32) {
        state.store.add_player(id, format!("p{id}"), (x, y)).unwrap();
    }

    fn bullet(owner_id: PlayerId, x: f32, y: f32, damage: f32) -> Projectile {
        Projectile {
            id: 0,
            owner_id,
            x,
            y,
            direction: 0.0,
            speed: 600.0,
            damage,
            spawned_at: 0.0,
        }
    }

    #[test]
    fn win_policy_parses() {
        assert_eq!("last_standing".parse(), Ok(WinPolicy::LastStanding));
        assert_eq!("kills:5".parse(), Ok(WinPolicy::KillLimit(5)));
        assert_eq!("NONE".parse(), Ok(WinPolicy::Disabled));
        assert!("kills:0".parse::<WinPolicy>().is_err());
        assert!("sudden_death".parse::<WinPolicy>().is_err());
    }

    #[test]
    fn move_lands_on_next_tick() {
        let mut state = test_state(4, WinPolicy::Disabled);
        place(&mut state, 1, 600.0, 150.0);

        state.queue_move(1, 4.0, -3.0, 1.25).unwrap();
        // Rotation is taken as-is, position waits for the tick
        assert_eq!(state.store.players[&1].rotation, 1.25);
        assert_eq!(state.store.players[&1].x, 600.0);

        state.run_tick();
        let p = &state.store.players[&1];
        assert_eq!((p.x, p.y), (604.0, 147.0));
        assert_eq!((p.pending_dx, p.pending_dy), (0.0, 0.0));
    }

    #[test]
    fn large_moves_land_in_one_tick() {
        let mut state = test_state(4, WinPolicy::Disabled);
        place(&mut state, 1, 400.0, 150.0);

        state.queue_move(1, 50.0, 0.0, 0.0).unwrap();
        state.run_tick();
        assert_eq!(state.store.players[&1].x, 450.0);

        // Deltas queued within one tick add up
        state.queue_move(1, 30.0, 0.0, 0.0).unwrap();
        state.queue_move(1, 30.0, 0.0, 0.0).unwrap();
        state.run_tick();
        assert_eq!(state.store.players[&1].x, 510.0);
    }

    #[test]
    fn move_is_clamped_to_world() {
        let mut state = test_state(4, WinPolicy::Disabled);
        place(&mut state, 1, 1000.0, 1195.0);
        state.queue_move(1, 0.0, 10.0, 0.0).unwrap();
        state.run_tick();
        assert_eq!(state.store.players[&1].y, 1200.0);
    }

    #[test]
    fn move_into_central_block_is_refused() {
        let mut state = test_state(4, WinPolicy::Disabled);
        // Just left of the central block (700..900, 500..700)
        place(&mut state, 1, 675.0, 600.0);
        state.queue_move(1, 10.0, 0.0, 0.0).unwrap();
        state.run_tick();
        assert_eq!(state.store.players[&1].x, 675.0);
    }

    #[test]
    fn hits_reduce_health_then_kill() {
        let mut state = test_state(4, WinPolicy::Disabled);
        place(&mut state, 1, 600.0, 150.0);
        place(&mut state, 2, 100.0, 100.0);

        state.store.add_projectile(bullet(1, 75.0, 100.0, 30.0));
        let hits = state.run_tick();
        assert_eq!(hits.len(), 1);
        let target = &state.store.players[&2];
        assert_eq!(target.health, 70.0);
        assert!(target.alive);
        assert!(state.store.projectiles.is_empty());

        state.store.add_projectile(bullet(1, 75.0, 100.0, 80.0));
        let hits = state.run_tick();
        assert!(hits[0].target_killed);
        let target = &state.store.players[&2];
        assert_eq!(target.health, 0.0);
        assert!(!target.alive);
        assert_eq!(target.deaths, 1);
        assert_eq!(state.store.players[&1].kills, 1);
    }

    #[test]
    fn dead_players_are_not_hit_again() {
        let mut state = test_state(4, WinPolicy::Disabled);
        place(&mut state, 1, 600.0, 150.0);
        place(&mut state, 2, 100.0, 100.0);
        state.store.player_mut(2).unwrap().set_health(0.0);

        state.store.add_projectile(bullet(1, 75.0, 100.0, 30.0));
        assert!(state.run_tick().is_empty());
        assert_eq!(state.store.players[&1].kills, 0);
        assert_eq!(state.store.projectiles.len(), 1);
    }

    #[test]
    fn projectile_outlives_its_owner() {
        let mut state = test_state(4, WinPolicy::Disabled);
        place(&mut state, 1, 600.0, 150.0);
        place(&mut state, 2, 100.0, 100.0);
        state.store.add_projectile(bullet(1, 75.0, 100.0, 100.0));
        state.leave(1).unwrap();

        let hits = state.run_tick();
        assert!(hits[0].target_killed);
        assert!(!state.store.players[&2].alive);
    }

    #[test]
    fn projectile_hits_wall_and_disappears() {
        let mut state = test_state(4, WinPolicy::Disabled);
        // Central block starts at x = 700
        state.store.add_projectile(bullet(1, 695.0, 600.0, 20.0));
        state.run_tick();
        assert!(state.store.projectiles.is_empty());
    }

    #[test]
    fn last_standing_declares_winner() {
        let mut state = test_state(4, WinPolicy::LastStanding);
        place(&mut state, 1, 600.0, 150.0);
        place(&mut state, 2, 100.0, 100.0);
        state.run_tick();
        assert!(!state.store.game_over);

        state.store.add_projectile(bullet(1, 75.0, 100.0, MAX_HEALTH));
        state.run_tick();
        assert!(state.store.game_over);
        assert_eq!(state.store.winner_name.as_deref(), Some("p1"));
        assert!(state.game_over_at.is_some());

        assert_eq!(state.queue_move(1, 1.0, 0.0, 0.0), Err(GameError::MatchOver));
        assert_eq!(state.shoot(1, 0.0), Err(GameError::MatchOver));
    }

    #[test]
    fn finished_match_is_inactive_and_frozen() {
        let mut state = test_state(4, WinPolicy::LastStanding);
        place(&mut state, 1, 600.0, 150.0);
        place(&mut state, 2, 100.0, 100.0);
        assert!(state.is_active());

        state.store.add_projectile(bullet(1, 75.0, 100.0, MAX_HEALTH));
        state.run_tick();
        assert!(state.store.game_over);
        assert!(!state.is_active());
        assert!(!state.info().active);
        assert!(!state.is_deserted());

        // A shot still in the air cannot take down the winner
        let winner = state.store.players[&1].clone();
        state.store.add_projectile(bullet(2, winner.x - 25.0, winner.y, MAX_HEALTH));
        assert!(state.run_tick().is_empty());
        assert!(state.store.players[&1].alive);
        assert!(state.store.projectiles.is_empty());

        assert_eq!(state.join(3, None), Err(GameError::MatchOver));
    }

    #[test]
    fn lone_player_does_not_win_by_default() {
        let mut state = test_state(4, WinPolicy::LastStanding);
        place(&mut state, 1, 600.0, 150.0);
        state.run_tick();
        assert!(!state.store.game_over);
    }

    #[test]
    fn kill_limit_policy() {
        let mut state = test_state(4, WinPolicy::KillLimit(2));
        place(&mut state, 1, 600.0, 150.0);
        place(&mut state, 2, 100.0, 100.0);
        place(&mut state, 3, 1400.0, 800.0);

        state.store.add_projectile(bullet(1, 75.0, 100.0, MAX_HEALTH));
        state.run_tick();
        assert!(!state.store.game_over);

        state.respawn(2).unwrap();
        let p2 = state.store.player_mut(2).unwrap();
        p2.x = 100.0;
        p2.y = 100.0;
        state.store.add_projectile(bullet(1, 75.0, 100.0, MAX_HEALTH));
        state.run_tick();
        assert!(state.store.game_over);
        assert_eq!(state.store.winner_name.as_deref(), Some("p1"));
    }

    #[test]
    fn spawn_point_avoids_living_players() {
        let mut state = test_state(4, WinPolicy::Disabled);
        let first = state.map.spawn_points[0];
        place(&mut state, 1, first.0, first.1);
        let chosen = state.pick_spawn_point();
        assert_ne!(chosen, first);
    }

    #[test]
    fn registry_enforces_unique_names() {
        let registry = MatchRegistry::new();
        let map = load_map("Map1").unwrap();
        let (_a, handle_a) = GameMatch::new(
            Uuid::new_v4(),
            "Arena1".into(),
            Arc::clone(&map),
            2,
            GameSettings::default(),
        );
        let (_b, handle_b) =
            GameMatch::new(Uuid::new_v4(), "Arena1".into(), map, 2, GameSettings::default());

        registry.insert(handle_a.clone()).unwrap();
        assert_eq!(registry.insert(handle_b), Err(GameError::DuplicateName));
        assert_eq!(registry.get_by_name("Arena1").map(|h| h.id), Some(handle_a.id));

        registry.remove(&handle_a.id);
        assert!(registry.get_by_name("Arena1").is_none());
        assert_eq!(registry.active_matches(), 0);
    }

    #[tokio::test]
    async fn actor_applies_requests_and_publishes_snapshots() {
        let map = load_map("Map1").unwrap();
        let (game_match, handle) = GameMatch::new(
            Uuid::new_v4(),
            "Live".into(),
            map,
            2,
            GameSettings::default(),
        );
        let mut snapshots = handle.subscribe();
        let task = tokio::spawn(game_match.run());

        let info = handle
            .request(Command::Join {
                player_id: 1,
                username: Some("alice".into()),
            })
            .await
            .unwrap();
        assert_eq!(info.player_ids, vec![1]);
        assert!(info.active);

        let snapshot = loop {
            match snapshots.recv().await {
                Ok(ServerMsg::State(s)) if s.players.contains_key(&1) => break s,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("match ended early"),
            }
        };
        assert_eq!(snapshot.players[&1].username, "alice");
        assert_eq!(handle.player_count(), 1);

        let info = handle.request(Command::Leave { player_id: 1 }).await.unwrap();
        assert!(!info.active);
        assert_eq!(task.await.unwrap(), RetireReason::Empty);
        assert_eq!(
            handle.request(Command::AddBot).await,
            Err(GameError::MatchNotFound)
        );
        assert!(!handle.is_active());
    }

    #[test]
    fn retirement_rules() {
        let settings = GameSettings {
            game_over_grace: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(600),
            ..GameSettings::default()
        };
        let map = load_map("Map1").unwrap();
        let (mut game_match, _handle) =
            GameMatch::new(Uuid::new_v4(), "Rules".into(), map, 4, settings);

        assert_eq!(game_match.retire_reason(true), None);
        assert_eq!(game_match.retire_reason(false), Some(RetireReason::Abandoned));

        game_match.state.join(1, None).unwrap();
        game_match.state.store.game_over = true;
        game_match.state.game_over_at = Some(game_match.state.clock);
        assert_eq!(game_match.retire_reason(true), None);

        game_match.state.clock += 0.2;
        assert_eq!(game_match.retire_reason(true), Some(RetireReason::Finished));

        game_match.state.leave(1).unwrap();
        assert_eq!(game_match.retire_reason(true), Some(RetireReason::Empty));
    }

    #[test]
    fn unjoined_match_goes_idle() {
        let settings = GameSettings {
            idle_timeout: Duration::ZERO,
            ..GameSettings::default()
        };
        let map = load_map("Map1").unwrap();
        let (mut game_match, _handle) =
            GameMatch::new(Uuid::new_v4(), "Idle".into(), map, 4, settings);
        assert_eq!(game_match.retire_reason(true), Some(RetireReason::Idle));

        // Bots alone do not keep a match from idling out
        game_match.state.add_bot().unwrap();
        assert_eq!(game_match.retire_reason(true), Some(RetireReason::Idle));

        game_match.state.join(1, None).unwrap();
        assert_eq!(game_match.retire_reason(true), None);
    }
}
