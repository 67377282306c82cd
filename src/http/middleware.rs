//! JWT verification for WebSocket upgrades.
//!
//! Tokens are Supabase access tokens: HS256, signed with the project JWT
//! secret. Verification happens before the upgrade so a bad token costs a
//! plain 401 instead of a socket.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    pub sub: Uuid,
    pub exp: u64,
    #[allow(dead_code)]
    pub iat: Option<u64>,
    pub username: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Verify an HS256 JWT and return its claims.
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (header, payload, signature) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
        _ => return Err(AuthError::Malformed),
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::BadSignature)?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let expected = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AuthError::Malformed)?;
    mac.verify_slice(&expected)
        .map_err(|_| AuthError::BadSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::Malformed)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;

    let now = crate::util::time::unix_millis() / 1000;
    if claims.exp <= now {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}
