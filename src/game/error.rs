//! Errors raised while validating match commands

/// Reasons a command or lifecycle operation is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Match not found")]
    MatchNotFound,

    #[error("Match is full")]
    MatchFull,

    #[error("A match with that name already exists")]
    DuplicateName,

    #[error("Player is already in this match")]
    DuplicatePlayer,

    #[error("Player is already in another match; leave it first")]
    AlreadyInMatch,

    #[error("Player is dead")]
    PlayerDead,

    #[error("Player is alive")]
    PlayerAlive,

    #[error("Weapon is cooling down")]
    RateLimited,

    #[error("Match is over")]
    MatchOver,

    #[error("Unknown map: {0}")]
    MapNotFound(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl GameError {
    /// Stable machine-readable code for wire errors
    pub fn code(&self) -> &'static str {
        match self {
            GameError::MatchNotFound => "MATCH_NOT_FOUND",
            GameError::MatchFull => "MATCH_FULL",
            GameError::DuplicateName => "DUPLICATE_NAME",
            GameError::DuplicatePlayer => "DUPLICATE_PLAYER",
            GameError::AlreadyInMatch => "ALREADY_IN_MATCH",
            GameError::PlayerDead => "PLAYER_DEAD",
            GameError::PlayerAlive => "PLAYER_ALIVE",
            GameError::RateLimited => "RATE_LIMITED",
            GameError::MatchOver => "MATCH_OVER",
            GameError::MapNotFound(_) => "MAP_NOT_FOUND",
            GameError::InvalidCommand(_) => "INVALID_COMMAND",
        }
    }
}
