//! Command intake: validation and application of player intents

use super::bot::{next_bot_id, BotBrain};
use super::combat::{CombatSystem, Projectile, WeaponKind, WeaponStats, MAX_HEALTH};
use super::entities::{PlayerId, BOT_ID_BASE};
use super::error::GameError;
use super::r#match::{Command, MatchState};

impl MatchState {
    /// Validate and apply one command against the live entity store
    pub fn apply(&mut self, command: Command) -> Result<(), GameError> {
        match command {
            Command::Join {
                player_id,
                username,
            } => self.join(player_id, username),
            Command::Leave { player_id } => self.leave(player_id),
            Command::Move {
                player_id,
                delta_x,
                delta_y,
                rotation,
            } => self.queue_move(player_id, delta_x, delta_y, rotation),
            Command::Shoot {
                player_id,
                direction,
            } => self.shoot(player_id, direction).map(|_| ()),
            Command::Respawn { player_id } => self.respawn(player_id),
            Command::SwitchWeapon { player_id, weapon } => self.switch_weapon(player_id, weapon),
            Command::AddBot => self.add_bot().map(|_| ()),
            Command::RemoveBot { bot_id } => self.remove_bot(bot_id),
        }
    }

    /// Admit a player and spawn them. Joining again only refreshes the name.
    pub fn join(&mut self, player_id: PlayerId, username: Option<String>) -> Result<(), GameError> {
        if player_id >= BOT_ID_BASE {
            return Err(GameError::InvalidCommand(format!(
                "player id {player_id} is reserved for bots"
            )));
        }
        let username = username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        if let Some(existing) = self.store.players.get_mut(&player_id) {
            if let Some(name) = username {
                existing.username = name;
                self.info_dirty = true;
            }
            return Ok(());
        }

        if self.store.game_over {
            return Err(GameError::MatchOver);
        }
        if self.store.players.len() >= self.max_players {
            return Err(GameError::MatchFull);
        }

        let spawn = self.pick_spawn_point();
        let username = username.unwrap_or_else(|| format!("Player{player_id}"));
        self.store.add_player(player_id, username, spawn)?;
        self.had_human = true;
        self.info_dirty = true;
        Ok(())
    }

    /// Remove a player. Projectiles they fired keep flying.
    pub fn leave(&mut self, player_id: PlayerId) -> Result<(), GameError> {
        self.store.remove_player(player_id).ok_or_else(|| {
            GameError::InvalidCommand(format!("player {player_id} is not in this match"))
        })?;
        self.bots.remove(&player_id);
        self.info_dirty = true;
        Ok(())
    }

    /// Queue a displacement for the next tick and take the new facing
    pub fn queue_move(
        &mut self,
        player_id: PlayerId,
        delta_x: f32,
        delta_y: f32,
        rotation: f32,
    ) -> Result<(), GameError> {
        if !(delta_x.is_finite() && delta_y.is_finite() && rotation.is_finite()) {
            return Err(GameError::InvalidCommand("movement must be finite".to_string()));
        }

        let game_over = self.store.game_over;
        let player = self.store.player_mut(player_id)?;
        if game_over {
            return Err(GameError::MatchOver);
        }
        if !player.alive {
            return Err(GameError::PlayerDead);
        }

        player.pending_dx += delta_x;
        player.pending_dy += delta_y;
        player.rotation = rotation;
        Ok(())
    }

    /// Fire the current weapon. Returns the new projectile's id.
    pub fn shoot(&mut self, player_id: PlayerId, direction: f32) -> Result<u64, GameError> {
        if !direction.is_finite() {
            return Err(GameError::InvalidCommand("direction must be finite".to_string()));
        }

        let (now, game_over) = (self.clock, self.store.game_over);
        let player = self.store.player_mut(player_id)?;
        if game_over {
            return Err(GameError::MatchOver);
        }
        if !player.alive {
            return Err(GameError::PlayerDead);
        }

        let stats = WeaponStats::for_kind(player.weapon);
        if !CombatSystem::can_fire(player.last_shot_at, now, &stats) {
            return Err(GameError::RateLimited);
        }
        player.last_shot_at = Some(now);

        let projectile = Projectile {
            id: 0,
            owner_id: player_id,
            x: player.x,
            y: player.y,
            direction,
            speed: stats.projectile_speed,
            damage: stats.damage,
            spawned_at: now,
        };
        Ok(self.store.add_projectile(projectile))
    }

    /// Bring a dead player back at full health on a spawn point
    pub fn respawn(&mut self, player_id: PlayerId) -> Result<(), GameError> {
        if self.store.player(player_id)?.alive {
            return Err(GameError::PlayerAlive);
        }
        if self.store.game_over {
            return Err(GameError::MatchOver);
        }

        let (x, y) = self.pick_spawn_point();
        let player = self.store.player_mut(player_id)?;
        player.set_health(MAX_HEALTH);
        player.x = x;
        player.y = y;
        player.pending_dx = 0.0;
        player.pending_dy = 0.0;
        player.died_at = None;
        Ok(())
    }

    pub fn switch_weapon(&mut self, player_id: PlayerId, weapon: WeaponKind) -> Result<(), GameError> {
        self.store.player_mut(player_id)?.weapon = weapon;
        Ok(())
    }

    /// Add a server-driven player. Returns the bot's id.
    pub fn add_bot(&mut self) -> Result<PlayerId, GameError> {
        if self.bots.len() >= self.max_bots {
            return Err(GameError::InvalidCommand(format!(
                "bot limit of {} reached",
                self.max_bots
            )));
        }
        if self.store.players.len() >= self.max_players {
            return Err(GameError::MatchFull);
        }

        let bot_id = next_bot_id();
        let spawn = self.pick_spawn_point();
        self.store
            .add_player(bot_id, format!("Bot{}", bot_id - BOT_ID_BASE), spawn)?;
        self.bots.insert(bot_id, BotBrain::default());
        self.info_dirty = true;
        Ok(bot_id)
    }

    pub fn remove_bot(&mut self, bot_id: PlayerId) -> Result<(), GameError> {
        if !self.bots.contains_key(&bot_id) {
            return Err(GameError::InvalidCommand(format!(
                "{bot_id} is not a bot in this match"
            )));
        }
        self.leave(bot_id)
    }
}
