//! Bearer token issuing and validation.
//!
//! Tokens are issued by the platform's user service; this crate only needs to
//! validate them. [`issue_token`] exists for operators and tests.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// JWT claims carried by every API token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User name.
    pub sub: String,
    pub user_id: i64,
    #[serde(default)]
    pub super_user: bool,
    pub exp: i64,
    pub iat: i64,
}

/// Sign a token for `user_name` valid for `ttl_secs`.
pub fn issue_token(
    user_name: &str,
    user_id: i64,
    super_user: bool,
    jwt_secret: &str,
    ttl_secs: i64,
) -> Result<String, AppError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_name.to_string(),
        user_id,
        super_user,
        exp: now + ttl_secs,
        iat: now,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token signing failed: {e}")))
}

/// Validate a JWT and return its claims.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<Claims, AppError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let validation = Validation::default();

    jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AppError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates() {
        let token = issue_token("alice", 7, true, "secret", 60).unwrap();
        let claims = validate_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.user_id, 7);
        assert!(claims.super_user);
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = issue_token("alice", 7, false, "secret", 60).unwrap();
        assert!(validate_token(&token, "other").unwrap_err().is_unauthorized());
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let token = issue_token("alice", 7, false, "secret", -3600).unwrap();
        assert!(validate_token(&token, "secret").unwrap_err().is_unauthorized());
    }
}
