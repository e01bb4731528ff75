//! Session and node credentials
//!
//! Operator sessions use HS256 JWTs carrying a `jti` so individual tokens
//! can be revoked before their natural expiry. Node credentials are opaque
//! URL-safe random bearer tokens issued at registration.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::db::user::Role;
use crate::{Error, Result};

/// Node bearer-token length in random bytes (before encoding)
const NODE_TOKEN_BYTES: usize = 32;

/// JWT claims for an operator session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username
    pub sub: String,
    /// User record id
    pub user_id: String,
    /// Role at issue time
    pub role: Role,
    /// Token identifier, target of revocation
    pub jti: String,
    /// Expiry as a unix timestamp
    pub exp: i64,
}

impl Claims {
    /// Natural expiry of this token
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

/// Issues and validates operator session tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

impl TokenIssuer {
    /// Create an issuer from the signing secret
    #[must_use]
    pub fn new(secret: &str, expiry_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::minutes(expiry_minutes),
        }
    }

    /// Issue a token for a user
    ///
    /// # Errors
    ///
    /// Returns error if JWT encoding fails
    pub fn issue(&self, username: &str, user_id: &str, role: Role) -> Result<(String, Claims)> {
        let claims = Claims {
            sub: username.to_string(),
            user_id: user_id.to_string(),
            role,
            jti: uuid::Uuid::new_v4().to_string(),
            exp: (Utc::now() + self.expiry).timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Auth(format!("token encoding failed: {e}")))?;
        Ok((token, claims))
    }

    /// Decode and validate a token, checking signature and expiry
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] for invalid, tampered, or expired tokens
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Auth(format!("invalid token: {e}")))
    }

    /// Session lifetime in seconds, for login responses
    #[must_use]
    pub const fn expiry_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }
}

/// Generate an opaque bearer token for a node
#[must_use]
pub fn generate_node_token() -> String {
    let mut bytes = [0u8; NODE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
