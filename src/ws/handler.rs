//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameError, PlayerId};
use crate::http::auth::{AuthError, AuthenticatedPlayer};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Frames a connection may have queued for its writer
const OUTBOUND_BUFFER: usize = 32;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token, required when a secret is configured
    #[serde(default)]
    pub token: Option<String>,
}

/// What the reader hands to the writer task
pub enum Outbound {
    /// Replace the current match topic
    Subscribe {
        match_id: Uuid,
        rx: broadcast::Receiver<ServerMsg>,
    },
    /// Direct reply to this connection
    Message(ServerMsg),
}

/// Per-connection state owned by the reader loop
pub struct Session {
    pub connection_id: Uuid,
    /// Player proven by token, if auth is on
    pub identity: Option<PlayerId>,
    /// Player and match joined over this connection; left on disconnect
    pub joined: Option<(PlayerId, Uuid)>,
    pub subscribed: Option<Uuid>,
    outbound: mpsc::Sender<Outbound>,
}

impl Session {
    pub fn new(identity: Option<PlayerId>, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            identity,
            joined: None,
            subscribed: None,
            outbound,
        }
    }

    async fn send(&self, msg: ServerMsg) {
        if self.outbound.send(Outbound::Message(msg)).await.is_err() {
            debug!(connection_id = %self.connection_id, "Writer gone, dropping message");
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let identity = match state.config.jwt_secret.as_deref() {
        None => None,
        Some(secret) => {
            let Some(token) = query.token.as_deref() else {
                warn!("WebSocket upgrade without token");
                return AuthError::MissingHeader.into_response();
            };
            match AuthenticatedPlayer::from_token(token, secret) {
                Ok(player) => {
                    info!(player_id = player.player_id, "WebSocket upgrade for authenticated player");
                    Some(player.player_id)
                }
                Err(e) => {
                    error!(error = %e, "WebSocket auth failed");
                    return e.into_response();
                }
            }
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Option<PlayerId>, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut session = Session::new(identity, outbound_tx);
    let connection_id = session.connection_id;

    info!(connection_id = %connection_id, player_id = ?identity, "New WebSocket connection");

    // Spawn writer task: replies and match topic -> WebSocket
    let writer_handle = tokio::spawn(run_writer(ws_sink, outbound_rx, connection_id));

    session
        .send(ServerMsg::Welcome {
            player_id: identity,
            server_time: unix_millis(),
        })
        .await;

    let rate_limiter = ConnectionRateLimiter::new();

    // Reader loop: WebSocket -> matchmaking
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_command() {
                    warn!(connection_id = %connection_id, "Rate limited command message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => handle_message(&state, &mut session, client_msg).await,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    disconnect(&state, &mut session).await;
    writer_handle.abort();

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Dispatch one message, reporting failures of request-style commands
pub async fn handle_message(state: &AppState, session: &mut Session, msg: ClientMsg) {
    let label = message_label(&msg);
    let is_gameplay = matches!(
        msg,
        ClientMsg::Move { .. }
            | ClientMsg::Shoot { .. }
            | ClientMsg::Respawn { .. }
            | ClientMsg::SwitchWeapon { .. }
    );

    if let Err(e) = dispatch(state, session, msg).await {
        warn!(
            connection_id = %session.connection_id,
            command = label,
            error = %e,
            "Command failed"
        );
        // Gameplay commands are fire-and-forget
        if !is_gameplay {
            session
                .send(ServerMsg::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
        }
    }
}

async fn dispatch(state: &AppState, session: &mut Session, msg: ClientMsg) -> Result<(), GameError> {
    if let (Some(identity), Some(player_id)) = (session.identity, msg.player_id()) {
        if identity != player_id {
            return Err(GameError::InvalidCommand(format!(
                "connection is authenticated as player {identity}"
            )));
        }
    }

    match msg {
        ClientMsg::Join {
            match_id,
            player_id,
            username,
        } => {
            // One player per connection so disconnect can clean up after it
            if let Some((current, _)) = session.joined.filter(|(current, _)| *current != player_id) {
                return Err(GameError::InvalidCommand(format!(
                    "connection already plays as player {current}; leave first"
                )));
            }
            state
                .matchmaking
                .join_match_by_id(&match_id, player_id, username)
                .await?;
            session.joined = Some((player_id, match_id));
            subscribe(state, session, match_id).await
        }
        ClientMsg::Leave { player_id } => {
            state.matchmaking.leave_current(player_id).await?;
            if session.joined.is_some_and(|(joined, _)| joined == player_id) {
                session.joined = None;
            }
            Ok(())
        }
        ClientMsg::AddBot { match_id } => {
            let match_id = target_match(session, match_id)?;
            state.matchmaking.add_bot(&match_id).await.map(|_| ())
        }
        ClientMsg::RemoveBot { match_id, bot_id } => {
            let match_id = target_match(session, match_id)?;
            state
                .matchmaking
                .remove_bot(&match_id, bot_id)
                .await
                .map(|_| ())
        }
        ClientMsg::Subscribe { match_id } => subscribe(state, session, match_id).await,
        gameplay => {
            let (match_id, command) = gameplay
                .into_gameplay()
                .ok_or_else(|| GameError::InvalidCommand("unsupported message".to_string()))?;
            state.matchmaking.submit(&match_id, command)
        }
    }
}

fn target_match(session: &Session, explicit: Option<Uuid>) -> Result<Uuid, GameError> {
    explicit
        .or(session.subscribed)
        .ok_or_else(|| GameError::InvalidCommand("no match selected".to_string()))
}

/// Point the writer at a match's state topic
async fn subscribe(state: &AppState, session: &mut Session, match_id: Uuid) -> Result<(), GameError> {
    let handle = state
        .matchmaking
        .handle(&match_id)
        .ok_or(GameError::MatchNotFound)?;

    session
        .outbound
        .send(Outbound::Subscribe {
            match_id,
            rx: handle.subscribe(),
        })
        .await
        .map_err(|_| GameError::InvalidCommand("connection is closing".to_string()))?;
    session.subscribed = Some(match_id);

    debug!(connection_id = %session.connection_id, match_id = %match_id, "Subscribed to match");
    Ok(())
}

/// A dropped connection counts as leaving the joined match
pub async fn disconnect(state: &AppState, session: &mut Session) {
    let Some((player_id, match_id)) = session.joined.take() else {
        return;
    };

    match state.matchmaking.leave_match(&match_id, player_id).await {
        Ok(_) => info!(player_id, match_id = %match_id, "Player left on disconnect"),
        Err(e) => debug!(player_id, match_id = %match_id, error = %e, "Disconnect leave skipped"),
    }
}

fn message_label(msg: &ClientMsg) -> &'static str {
    match msg {
        ClientMsg::Join { .. } => "join",
        ClientMsg::Move { .. } => "move",
        ClientMsg::Shoot { .. } => "shoot",
        ClientMsg::Respawn { .. } => "respawn",
        ClientMsg::SwitchWeapon { .. } => "switchWeapon",
        ClientMsg::Leave { .. } => "leave",
        ClientMsg::AddBot { .. } => "addBot",
        ClientMsg::RemoveBot { .. } => "removeBot",
        ClientMsg::Subscribe { .. } => "subscribe",
    }
}

/// Writer task: forwards direct replies and the current match topic
async fn run_writer(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    connection_id: Uuid,
) {
    let mut topic: Option<broadcast::Receiver<ServerMsg>> = None;

    loop {
        let msg = tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Subscribe { match_id, rx }) => {
                    topic = Some(rx);
                    ServerMsg::Subscribed { match_id }
                }
                Some(Outbound::Message(msg)) => msg,
                None => break,
            },
            published = next_published(&mut topic) => match published {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        connection_id = %connection_id,
                        lagged_count = n,
                        "Client lagged, skipping {} snapshots", n
                    );
                    // Continue - don't disconnect for lag
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection_id = %connection_id, "Match topic closed");
                    topic = None;
                    continue;
                }
            },
        };

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

async fn next_published(
    topic: &mut Option<broadcast::Receiver<ServerMsg>>,
) -> Result<ServerMsg, broadcast::error::RecvError> {
    match topic {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
