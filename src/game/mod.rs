//! Game simulation modules

pub mod bot;
pub mod combat;
pub mod entities;
pub mod error;
pub mod intake;
pub mod map;
pub mod r#match;
pub mod physics;
pub mod snapshot;

pub use combat::WeaponKind;
pub use entities::PlayerId;
pub use error::GameError;
pub use map::{load_map, map_ids, Wall};
pub use r#match::{Command, GameMatch, MatchHandle, MatchInfo, MatchRegistry, WinPolicy};
pub use snapshot::MatchSnapshot;
