//! Match lifecycle: creation, discovery, membership and retirement

pub mod service;

pub use service::MatchmakingService;
