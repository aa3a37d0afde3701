//! Bearer-token verification.
//!
//! Tokens are issued by the account service that owns user identities; the
//! API only verifies them. `sub` is the [`UserId`] that ledger balances and
//! job ownership are keyed by, and `iss` must match the configured issuer.

use atelier_core::types::UserId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: UserId,
    pub iss: String,
    /// Expiry, Unix seconds.
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HS256 secret shared with the issuing service.
    pub secret: String,
    pub issuer: String,
    /// Lifetime of tokens minted by [`TokenAuthority::issue`].
    pub access_token_expiry_mins: i64,
}

const DEFAULT_ISSUER: &str = "atelier";
const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;

impl JwtConfig {
    /// | Env Var                  | Required | Default   |
    /// |--------------------------|----------|-----------|
    /// | `JWT_SECRET`             | **yes**  | --        |
    /// | `JWT_ISSUER`             | no       | `atelier` |
    /// | `JWT_ACCESS_EXPIRY_MINS` | no       | `15`      |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is missing or empty.
    pub fn from_env() -> Self {
        let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        Self {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.into()),
            access_token_expiry_mins: std::env::var("JWT_ACCESS_EXPIRY_MINS")
                .ok()
                .map(|v| v.parse().expect("JWT_ACCESS_EXPIRY_MINS must be an integer"))
                .unwrap_or(DEFAULT_ACCESS_EXPIRY_MINS),
        }
    }
}

/// Why a token was refused.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(err),
        }
    }
}

/// Keys and validation rules derived once from [`JwtConfig`].
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    expiry_secs: i64,
}

impl TokenAuthority {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            expiry_secs: config.access_token_expiry_mins * 60,
        }
    }

    /// Mint a token for `user_id`. Used by tests and local tooling.
    pub fn issue(&self, user_id: UserId) -> Result<String, TokenError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            iss: self.issuer.clone(),
            exp: now + self.expiry_secs,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        Ok(decode::<Claims>(token, &self.decoding, &self.validation)?.claims)
    }
}
