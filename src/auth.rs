//! Bearer token verification for the admin query API.
//!
//! Tokens are HS256 JWTs carrying `sub`, `exp` and an optional `role`.
//! Only the `admin` role may read rate-limiting data.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// Pull the token out of an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AppError> {
    let value = header.ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("malformed authorization header".into()))
}

/// Verify signature and expiry. Role is not checked here.
pub fn verify(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::Unauthorized("token expired".into()),
            _ => {
                tracing::debug!(error = %e, "rejected bearer token");
                AppError::Unauthorized("invalid token".into())
            }
        })
}

/// Full admin check for one request: header present, token valid, role admin.
pub fn authorize_admin(header: Option<&str>, secret: &str) -> Result<Claims, AppError> {
    let claims = verify(bearer_token(header)?, secret)?;
    if !claims.is_admin() {
        tracing::warn!(sub = %claims.sub, role = ?claims.role, "non-admin token rejected");
        return Err(AppError::Forbidden("admin role required".into()));
    }
    Ok(claims)
}

/// Mint a token valid for `ttl`.
pub fn issue_token(
    sub: &str,
    role: Option<&str>,
    ttl: Duration,
    secret: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (Utc::now() + ttl).timestamp(),
        role: role.map(String::from),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_admin_token_round_trip() {
        let token = issue_token("ops-1", Some("admin"), Duration::hours(1), SECRET).unwrap();
        let header = format!("Bearer {}", token);
        let claims = authorize_admin(Some(&header), SECRET).unwrap();
        assert_eq!(claims.sub, "ops-1");
        assert!(claims.is_admin());
    }

    #[test]
    fn test_missing_and_malformed_header() {
        assert!(matches!(
            authorize_admin(None, SECRET),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize_admin(Some("Basic abc"), SECRET),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize_admin(Some("Bearer   "), SECRET),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize_admin(Some("Bearer not-a-jwt"), SECRET),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let token = issue_token("ops-1", Some("admin"), Duration::hours(-1), SECRET).unwrap();
        match verify(&token, SECRET) {
            Err(AppError::Unauthorized(msg)) => assert_eq!(msg, "token expired"),
            other => panic!("expected expiry rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_secret() {
        let token = issue_token("ops-1", Some("admin"), Duration::hours(1), "other").unwrap();
        assert!(matches!(verify(&token, SECRET), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_non_admin_is_forbidden() {
        let token = issue_token("student-7", Some("student"), Duration::hours(1), SECRET).unwrap();
        let header = format!("Bearer {}", token);
        assert!(matches!(
            authorize_admin(Some(&header), SECRET),
            Err(AppError::Forbidden(_))
        ));

        let no_role = issue_token("student-7", None, Duration::hours(1), SECRET).unwrap();
        let header = format!("Bearer {}", no_role);
        assert!(matches!(
            authorize_admin(Some(&header), SECRET),
            Err(AppError::Forbidden(_))
        ));
    }
}
