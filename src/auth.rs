use crate::config::Config;
use crate::error::{AppError, AppResult};
use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // account id
    pub jti: String, // unique per token
    pub exp: i64,    // expiration time
    pub iat: i64,    // issued at
    pub iss: String, // issuer
}

/// Verifies the tokens the external auth layer attaches to each connection.
///
/// Token issuance lives outside this service; `issue_token` exists for tests
/// and operational tooling that share the HS256 secret.
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    token_ttl_hours: i64,
}

impl AuthManager {
    pub fn new(config: &Config) -> Result<Self> {
        if config.jwt_secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must be set");
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            token_ttl_hours: config.token_ttl_hours,
        })
    }

    pub fn issue_token(&self, account_id: i64) -> Result<String> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            sub: account_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: iat + self.token_ttl_hours * 3600,
            iat,
            iss: self.issuer.clone(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Verify a handshake token and extract the account identity it carries.
    pub fn verify_token(&self, token: &str) -> AppResult<i64> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        data.claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::auth("token subject is not an account id"))
    }
}
