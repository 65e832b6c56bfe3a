//! JWT session tokens
//!
//! HS256 bearer tokens carrying the user id and email. Dashboard sessions
//! are issued at login and verified by the auth middleware on every
//! protected route.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue a session token for a user
    pub fn issue(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.map(str::to_string),
            exp: now + self.expiry_hours * 3600,
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Verify a token and return its claims. Expired or tampered tokens
    /// are rejected by the validation.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips() {
        let manager = JwtManager::new("test-secret", 24);
        let user_id = Uuid::new_v4();

        let token = manager.issue(user_id, Some("user@example.com")).unwrap();
        let claims = manager.verify(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn token_from_a_different_secret_is_rejected() {
        let issuer = JwtManager::new("secret-a", 24);
        let verifier = JwtManager::new("secret-b", 24);

        let token = issuer.issue(Uuid::new_v4(), None).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // Negative expiry puts exp in the past
        let manager = JwtManager::new("test-secret", -1);
        let token = manager.issue(Uuid::new_v4(), None).unwrap();
        assert!(manager.verify(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let manager = JwtManager::new("test-secret", 24);
        assert!(manager.verify("not-a-token").is_err());
        assert!(manager.verify("").is_err());
    }
}
