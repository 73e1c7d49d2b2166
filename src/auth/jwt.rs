use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::models::User;

/// Issuer pinned into every token so JWTs minted by other deployments are
/// rejected outright.
const ISSUER: &str = "gastos-backend";

const SESSION_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    /// User id.
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints the bearer token handed out by register and login.
pub fn issue_session_token(user: &User, secret: &str) -> AppResult<String> {
    let now = Utc::now().timestamp();

    let claims = SessionClaims {
        iss: ISSUER.to_string(),
        sub: user.id.clone(),
        email: user.email.clone(),
        iat: now,
        exp: now + SESSION_HOURS * 3600,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Checks signature, expiry and issuer, returning the session claims.
pub fn decode_session_token(token: &str, secret: &str) -> AppResult<SessionClaims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[ISSUER]);

    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u-1".to_string(),
            email: "jose@example.com".to_string(),
            display_name: "Jose".to_string(),
            password_hash: "x".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let token = issue_session_token(&user(), "secret").expect("issue failed");
        let claims = decode_session_token(&token, "secret").expect("decode failed");

        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.email, "jose@example.com");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = issue_session_token(&user(), "secret").expect("issue failed");
        assert!(decode_session_token(&token, "other-secret").is_err());
    }
}
