//! Matchmaking service - match creation, discovery, membership and retirement

use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::game::{
    load_map, Command, GameError, GameMatch, MatchHandle, MatchInfo, MatchRegistry, PlayerId,
};

/// Upper bound on `maxPlayers` for a single match
pub const MAX_PLAYERS_LIMIT: usize = 64;

/// Matchmaking service
#[derive(Clone)]
pub struct MatchmakingService {
    registry: Arc<MatchRegistry>,
    /// Map of player -> current match
    player_matches: Arc<DashMap<PlayerId, Uuid>>,
    settings: GameSettings,
    default_map: String,
}

impl MatchmakingService {
    pub fn new(registry: Arc<MatchRegistry>, settings: GameSettings, default_map: String) -> Self {
        Self {
            registry,
            player_matches: Arc::new(DashMap::new()),
            settings,
            default_map,
        }
    }

    /// Create a match and start its tick loop
    pub fn create_match(
        &self,
        name: &str,
        map_id: Option<&str>,
        max_players: usize,
    ) -> Result<MatchInfo, GameError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::InvalidCommand("match name is required".to_string()));
        }
        if !(1..=MAX_PLAYERS_LIMIT).contains(&max_players) {
            return Err(GameError::InvalidCommand(format!(
                "maxPlayers must be between 1 and {MAX_PLAYERS_LIMIT}"
            )));
        }

        let map_id = map_id.unwrap_or(&self.default_map);
        let map = load_map(map_id).ok_or_else(|| GameError::MapNotFound(map_id.to_string()))?;

        let match_id = Uuid::new_v4();
        let (game_match, handle) = GameMatch::new(
            match_id,
            name.to_string(),
            map,
            max_players,
            self.settings.clone(),
        );

        // Register match; claims the name or fails before anything runs
        self.registry.insert(handle.clone())?;

        info!(
            match_id = %match_id,
            name = %name,
            map = %map_id,
            max_players,
            "Created new match"
        );

        // Spawn match task
        let registry = self.registry.clone();
        let player_matches = self.player_matches.clone();

        tokio::spawn(async move {
            let reason = game_match.run().await;

            // Cleanup after match ends
            registry.remove(&match_id);
            player_matches.retain(|_, current| *current != match_id);

            info!(match_id = %match_id, ?reason, "Match removed from registry");
        });

        Ok(handle.info())
    }

    /// Active matches, oldest first, optionally filtered by a name substring
    pub fn list_matches(&self, search: Option<&str>) -> Vec<MatchInfo> {
        let search = search.filter(|s| !s.is_empty());
        let mut matches: Vec<MatchInfo> = self
            .registry
            .handles()
            .iter()
            .map(MatchHandle::info)
            .filter(|info| info.active)
            .filter(|info| search.map_or(true, |s| info.name.contains(s)))
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        matches
    }

    pub fn get_match(&self, match_id: &Uuid) -> Option<MatchInfo> {
        self.registry.get(match_id).map(|h| h.info())
    }

    pub fn handle(&self, match_id: &Uuid) -> Option<MatchHandle> {
        self.registry.get(match_id)
    }

    /// Get player's current match
    pub fn current_match_for_player(&self, player_id: PlayerId) -> Option<MatchInfo> {
        let match_id = *self.player_matches.get(&player_id)?;
        self.registry
            .get(&match_id)
            .map(|h| h.info())
            .filter(|info| info.active)
    }

    /// Join a match by name
    pub async fn join_match(
        &self,
        name: &str,
        player_id: PlayerId,
        username: Option<String>,
    ) -> Result<MatchInfo, GameError> {
        let handle = self
            .registry
            .get_by_name(name)
            .ok_or(GameError::MatchNotFound)?;
        self.join(&handle, player_id, username).await
    }

    /// Join a match by id
    pub async fn join_match_by_id(
        &self,
        match_id: &Uuid,
        player_id: PlayerId,
        username: Option<String>,
    ) -> Result<MatchInfo, GameError> {
        let handle = self.registry.get(match_id).ok_or(GameError::MatchNotFound)?;
        self.join(&handle, player_id, username).await
    }

    async fn join(
        &self,
        handle: &MatchHandle,
        player_id: PlayerId,
        username: Option<String>,
    ) -> Result<MatchInfo, GameError> {
        let newly_reserved = self.reserve(player_id, handle.id)?;

        match handle.request(Command::Join { player_id, username }).await {
            Ok(info) => {
                info!(match_id = %handle.id, player_id, players = info.player_count, "Player joined match");
                Ok(info)
            }
            Err(e) => {
                if newly_reserved {
                    self.player_matches
                        .remove_if(&player_id, |_, current| *current == handle.id);
                }
                debug!(match_id = %handle.id, player_id, error = %e, "Join refused");
                Err(e)
            }
        }
    }

    /// Claim the player's single active-match slot. Returns whether the slot
    /// was newly taken (as opposed to already pointing at this match).
    fn reserve(&self, player_id: PlayerId, match_id: Uuid) -> Result<bool, GameError> {
        match self.player_matches.entry(player_id) {
            Entry::Occupied(mut slot) => {
                let current = *slot.get();
                if current == match_id {
                    return Ok(false);
                }
                let still_active = self
                    .registry
                    .get(&current)
                    .is_some_and(|h| h.is_active());
                if still_active {
                    return Err(GameError::AlreadyInMatch);
                }
                slot.insert(match_id);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(match_id);
                Ok(true)
            }
        }
    }

    /// Leave a specific match
    pub async fn leave_match(
        &self,
        match_id: &Uuid,
        player_id: PlayerId,
    ) -> Result<MatchInfo, GameError> {
        let handle = self.registry.get(match_id).ok_or(GameError::MatchNotFound)?;
        let result = handle.request(Command::Leave { player_id }).await;

        // Whatever the actor says, the player is no longer bound to this match
        self.player_matches
            .remove_if(&player_id, |_, current| current == match_id);

        let info = result?;
        info!(match_id = %match_id, player_id, players = info.player_count, "Player left match");
        Ok(info)
    }

    /// Leave whatever match the player is in
    pub async fn leave_current(&self, player_id: PlayerId) -> Result<MatchInfo, GameError> {
        let match_id = self
            .player_matches
            .get(&player_id)
            .map(|r| *r)
            .ok_or(GameError::MatchNotFound)?;
        self.leave_match(&match_id, player_id).await
    }

    /// Queue a gameplay command without waiting for the tick
    pub fn submit(&self, match_id: &Uuid, command: Command) -> Result<(), GameError> {
        let handle = self.registry.get(match_id).ok_or(GameError::MatchNotFound)?;
        handle.submit(command).inspect_err(|e| {
            warn!(match_id = %match_id, error = %e, "Command not queued");
        })
    }

    pub async fn add_bot(&self, match_id: &Uuid) -> Result<MatchInfo, GameError> {
        let handle = self.registry.get(match_id).ok_or(GameError::MatchNotFound)?;
        let info = handle.request(Command::AddBot).await?;
        info!(match_id = %match_id, players = info.player_count, "Bot added");
        Ok(info)
    }

    pub async fn remove_bot(&self, match_id: &Uuid, bot_id: PlayerId) -> Result<MatchInfo, GameError> {
        let handle = self.registry.get(match_id).ok_or(GameError::MatchNotFound)?;
        let info = handle.request(Command::RemoveBot { bot_id }).await?;
        info!(match_id = %match_id, bot_id, "Bot removed");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn service() -> MatchmakingService {
        MatchmakingService::new(
            Arc::new(MatchRegistry::new()),
            GameSettings::default(),
            "Map1".to_string(),
        )
    }

    #[tokio::test]
    async fn arena_fills_up_at_capacity() {
        let svc = service();
        let created = svc.create_match("Arena1", Some("Map1"), 2).unwrap();
        assert!(created.active);
        assert_eq!(created.player_count, 0);

        svc.join_match("Arena1", 1, Some("alice".into())).await.unwrap();
        let info = svc.join_match("Arena1", 2, Some("bob".into())).await.unwrap();
        assert_eq!(info.player_ids, vec![1, 2]);

        assert_eq!(
            svc.join_match("Arena1", 3, Some("carol".into())).await,
            Err(GameError::MatchFull)
        );
        // A refused join leaves no reservation behind
        assert!(svc.current_match_for_player(3).is_none());
        svc.create_match("Other", None, 2).unwrap();
        svc.join_match("Other", 3, None).await.unwrap();
    }

    #[tokio::test]
    async fn create_validates_input() {
        let svc = service();
        assert_eq!(
            svc.create_match("Arena", Some("Atlantis"), 4),
            Err(GameError::MapNotFound("Atlantis".into()))
        );
        assert!(matches!(svc.create_match("  ", None, 4), Err(GameError::InvalidCommand(_))));
        assert!(matches!(svc.create_match("Arena", None, 0), Err(GameError::InvalidCommand(_))));

        svc.create_match("Arena", None, 4).unwrap();
        assert_eq!(svc.create_match("Arena", None, 4), Err(GameError::DuplicateName));
        assert_eq!(svc.list_matches(None).len(), 1);
    }

    #[tokio::test]
    async fn search_is_a_case_sensitive_substring() {
        let svc = service();
        for name in ["Arena1", "Arena2", "Pit"] {
            svc.create_match(name, None, 4).unwrap();
        }

        let names = |v: Vec<MatchInfo>| v.into_iter().map(|m| m.name).collect::<Vec<_>>();
        let mut found = names(svc.list_matches(Some("Are")));
        found.sort();
        assert_eq!(found, vec!["Arena1", "Arena2"]);
        assert!(svc.list_matches(Some("are")).is_empty());
        assert_eq!(svc.list_matches(None).len(), 3);
        assert_eq!(svc.list_matches(Some("")).len(), 3);
    }

    #[tokio::test]
    async fn one_active_match_per_player() {
        let svc = service();
        let a = svc.create_match("A", None, 4).unwrap();
        svc.create_match("B", None, 4).unwrap();

        svc.join_match("A", 7, None).await.unwrap();
        assert_eq!(svc.join_match("B", 7, None).await, Err(GameError::AlreadyInMatch));
        // Joining the same match again is fine
        svc.join_match("A", 7, Some("seven".into())).await.unwrap();
        assert_eq!(svc.current_match_for_player(7).map(|m| m.id), Some(a.id));

        // Second player keeps A alive while 7 moves on
        svc.join_match("A", 8, None).await.unwrap();
        svc.leave_match(&a.id, 7).await.unwrap();
        assert!(svc.current_match_for_player(7).is_none());
        svc.join_match("B", 7, None).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_joins_respect_capacity() {
        let svc = service();
        svc.create_match("Crowd", None, 3).unwrap();

        let joins = (1..=10u64).map(|id| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.join_match("Crowd", id, None).await })
        });
        let results = futures::future::join_all(joins).await;
        let admitted = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(admitted, 3);

        let crowd = svc.list_matches(Some("Crowd")).pop().unwrap();
        assert_eq!(crowd.player_count, 3);
    }

    #[tokio::test]
    async fn mixed_joins_and_leaves_never_exceed_capacity() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;
        use std::collections::BTreeSet;

        let svc = service();
        let info = svc.create_match("Churn", None, 4).unwrap();
        // Keeps the match from emptying out and retiring mid-run
        svc.join_match("Churn", 100, None).await.unwrap();
        let mut members = BTreeSet::from([100u64]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        for _ in 0..80 {
            let player_id = rng.gen_range(1..=8u64);
            if rng.gen_bool(0.6) {
                let result = svc.join_match("Churn", player_id, None).await;
                if members.contains(&player_id) || members.len() < 4 {
                    assert!(result.is_ok(), "join {player_id} refused: {result:?}");
                    members.insert(player_id);
                } else {
                    assert_eq!(result, Err(GameError::MatchFull));
                }
            } else {
                let result = svc.leave_match(&info.id, player_id).await;
                assert_eq!(result.is_ok(), members.remove(&player_id));
            }

            let current = svc.get_match(&info.id).unwrap();
            assert!(current.player_count <= 4);
            assert_eq!(current.player_ids, members.iter().copied().collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn last_leave_retires_the_match() {
        let svc = service();
        let info = svc.create_match("Solo", None, 2).unwrap();
        svc.join_match("Solo", 1, None).await.unwrap();
        assert!(svc.current_match_for_player(1).is_some());

        let after = svc.leave_current(1).await.unwrap();
        assert!(!after.active);
        assert!(svc.current_match_for_player(1).is_none());

        // Retirement is asynchronous
        tokio::time::timeout(Duration::from_secs(2), async {
            while svc.get_match(&info.id).is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(svc.list_matches(None).is_empty());
        assert_eq!(svc.join_match("Solo", 2, None).await, Err(GameError::MatchNotFound));
        // The name is free again
        svc.create_match("Solo", None, 2).unwrap();
    }

    #[tokio::test]
    async fn bots_join_and_leave_through_the_actor() {
        let svc = service();
        let info = svc.create_match("Bots", None, 4).unwrap();
        svc.join_match("Bots", 1, None).await.unwrap();

        let with_bot = svc.add_bot(&info.id).await.unwrap();
        assert_eq!(with_bot.player_count, 2);
        let bot_id = *with_bot.player_ids.last().unwrap();

        let without = svc.remove_bot(&info.id, bot_id).await.unwrap();
        assert_eq!(without.player_ids, vec![1]);
        assert!(matches!(
            svc.remove_bot(&info.id, 1).await,
            Err(GameError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn submit_to_unknown_match_fails() {
        let svc = service();
        assert_eq!(
            svc.submit(&Uuid::new_v4(), Command::Respawn { player_id: 1 }),
            Err(GameError::MatchNotFound)
        );
    }
}
