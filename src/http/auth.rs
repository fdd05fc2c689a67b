//! Bearer token authentication and JWT verification

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use crate::app::AppState;
use crate::game::PlayerId;
use crate::util::time::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// JWT claims carried by player tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (player id, decimal)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Verify an HS256 token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    // Verify signature (HMAC-SHA256)
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_millis() / 1000 {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract JWT from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token subject is not a player id")]
    InvalidSubject,

    #[error("Token does not belong to this player")]
    WrongPlayer,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::WrongPlayer => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Authenticated player extractor result
#[derive(Debug, Clone)]
pub struct AuthenticatedPlayer {
    pub player_id: PlayerId,
    pub claims: JwtClaims,
}

impl AuthenticatedPlayer {
    pub fn from_token(token: &str, secret: &str) -> Result<Self, AuthError> {
        let claims = verify_jwt(token, secret)?;
        let player_id = claims.sub.parse().map_err(|_| AuthError::InvalidSubject)?;
        Ok(Self { player_id, claims })
    }

    /// Refuse requests that act on behalf of someone else
    pub fn ensure(&self, player_id: PlayerId) -> Result<(), AuthError> {
        if self.player_id == player_id {
            Ok(())
        } else {
            Err(AuthError::WrongPlayer)
        }
    }
}

/// Middleware that requires a bearer token whenever a secret is configured
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(secret) = state.config.jwt_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;
    let auth_player = AuthenticatedPlayer::from_token(token, secret)?;

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(auth_player);

    Ok(next.run(request).await)
}

/// Sign claims with HS256 (tokens for tests)
#[cfg(test)]
pub fn sign_jwt(claims: &JwtClaims, secret: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{header}.{payload}").as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{header}.{payload}.{signature}")
}

#[cfg(test)]
pub fn token_for(player_id: PlayerId, secret: &str) -> String {
    sign_jwt(
        &JwtClaims {
            sub: player_id.to_string(),
            exp: unix_millis() / 1000 + 3600,
            iat: unix_millis() / 1000,
            username: None,
        },
        secret,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn valid_token_yields_player() {
        let token = token_for(42, SECRET);
        let player = AuthenticatedPlayer::from_token(&token, SECRET).unwrap();
        assert_eq!(player.player_id, 42);
        assert!(player.ensure(42).is_ok());
        assert!(matches!(player.ensure(43), Err(AuthError::WrongPlayer)));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let token = token_for(42, SECRET);
        assert!(matches!(verify_jwt(&token, "other"), Err(AuthError::InvalidToken)));

        let mut forged = token.clone();
        forged.push('x');
        assert!(verify_jwt(&forged, SECRET).is_err());
        assert!(matches!(verify_jwt("a.b", SECRET), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = JwtClaims {
            sub: "1".into(),
            exp: 1,
            iat: 0,
            username: None,
        };
        let token = sign_jwt(&claims, SECRET);
        assert!(matches!(verify_jwt(&token, SECRET), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn non_numeric_subject_is_rejected() {
        let claims = JwtClaims {
            sub: "alice".into(),
            exp: unix_millis() / 1000 + 60,
            iat: 0,
            username: None,
        };
        let token = sign_jwt(&claims, SECRET);
        assert!(matches!(
            AuthenticatedPlayer::from_token(&token, SECRET),
            Err(AuthError::InvalidSubject)
        ));
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }
}
