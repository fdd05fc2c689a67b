//! HTTP surface: REST routes and bearer-token auth

pub mod auth;
pub mod routes;

pub use routes::build_router;
