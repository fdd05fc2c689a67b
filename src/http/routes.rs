//! HTTP route definitions

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{load_map, map_ids, GameError, MatchInfo, PlayerId, Wall};
use crate::http::auth::{require_auth, AuthError, AuthenticatedPlayer};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/map/walls", get(default_walls_handler))
        .route("/api/map/:map_id/walls", get(walls_handler))
        .route("/api/matches", get(list_matches_handler))
        .route("/api/matches/:match_id", get(get_match_handler))
        .route(
            "/api/matches/player/:player_id/current",
            get(current_match_handler),
        );

    // Protected routes (auth required when a secret is configured)
    let protected_routes = Router::new()
        .route("/api/matches", post(create_match_handler))
        .route("/api/matches/join", post(join_match_handler))
        .route("/api/matches/:match_id/leave", post(leave_match_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origin))
        .with_state(state)
}

/// CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
fn cors_layer(client_origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return base.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();

    base.allow_origin(allowed_origins).allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
    maps: Vec<String>,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        active_players: state.match_registry.total_players(),
        maps: map_ids(),
    })
}

// ============================================================================
// Map endpoints
// ============================================================================

async fn default_walls_handler(State(state): State<AppState>) -> Result<Json<Vec<Wall>>, AppError> {
    map_walls(&state.config.default_map)
}

async fn walls_handler(Path(map_id): Path<String>) -> Result<Json<Vec<Wall>>, AppError> {
    map_walls(&map_id)
}

fn map_walls(map_id: &str) -> Result<Json<Vec<Wall>>, AppError> {
    let map = load_map(map_id).ok_or_else(|| GameError::MapNotFound(map_id.to_string()))?;
    Ok(Json(map.walls.clone()))
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMatchRequest {
    name: String,
    #[serde(default)]
    map_id: Option<String>,
    max_players: usize,
}

async fn create_match_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateMatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let info =
        state
            .matchmaking
            .create_match(&req.name, req.map_id.as_deref(), req.max_players)?;
    Ok((StatusCode::CREATED, Json(info)))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    search: Option<String>,
}

async fn list_matches_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<MatchInfo>> {
    Json(state.matchmaking.list_matches(query.search.as_deref()))
}

async fn get_match_handler(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<MatchInfo>, AppError> {
    state
        .matchmaking
        .get_match(&match_id)
        .map(Json)
        .ok_or_else(|| GameError::MatchNotFound.into())
}

async fn current_match_handler(
    State(state): State<AppState>,
    Path(player_id): Path<PlayerId>,
) -> Result<Json<MatchInfo>, AppError> {
    state
        .matchmaking
        .current_match_for_player(player_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Player {player_id} is not in a match")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinMatchRequest {
    name: String,
    player_id: PlayerId,
    #[serde(default)]
    username: Option<String>,
}

async fn join_match_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthenticatedPlayer>>,
    Json(req): Json<JoinMatchRequest>,
) -> Result<Json<MatchInfo>, AppError> {
    if let Some(Extension(auth)) = &auth {
        auth.ensure(req.player_id)?;
    }

    let username = req.username.or_else(|| {
        auth.as_ref()
            .and_then(|Extension(a)| a.claims.username.clone())
    });
    let info = state
        .matchmaking
        .join_match(&req.name, req.player_id, username)
        .await?;
    Ok(Json(info))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaveMatchRequest {
    player_id: PlayerId,
}

async fn leave_match_handler(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    auth: Option<Extension<AuthenticatedPlayer>>,
    Json(req): Json<LeaveMatchRequest>,
) -> Result<Json<MatchInfo>, AppError> {
    if let Some(Extension(auth)) = &auth {
        auth.ensure(req.player_id)?;
    }

    let info = state
        .matchmaking
        .leave_match(&match_id, req.player_id)
        .await?;
    Ok(Json(info))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            AppError::Auth(auth) => return auth.into_response(),
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Game(ref e) => match e {
                GameError::MatchNotFound | GameError::MapNotFound(_) => StatusCode::NOT_FOUND,
                GameError::MatchFull
                | GameError::DuplicateName
                | GameError::DuplicatePlayer
                | GameError::AlreadyInMatch => StatusCode::CONFLICT,
                GameError::PlayerDead
                | GameError::PlayerAlive
                | GameError::RateLimited
                | GameError::MatchOver => StatusCode::UNPROCESSABLE_ENTITY,
                GameError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            },
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}
