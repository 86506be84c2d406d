//! Identity verifier: bearer token in, current account snapshot out.
//!
//! The token only proves who the caller is. Role, ban and active state are
//! always read from the account store, never from the claims.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use panopticon_core::{Identity, Role, parse_id};

use crate::config::JwtConfig;
use crate::error::AuthError;
use crate::store::AccountStore;

/// Claims carried by a relay token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    /// Informational only.
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

pub struct IdentityVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl IdentityVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);

        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config: config.clone(),
        }
    }

    /// Sign a token for `identity` valid for the configured lifetime.
    pub fn issue(&self, identity: &Identity) -> jsonwebtoken::errors::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: identity.id.to_string(),
            username: identity.username.clone(),
            role: identity.role,
            iat: now,
            exp: now + self.config.ttl.as_secs() as usize,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Check signature, expiry, issuer and audience.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Resolve a token to the account as it is stored right now.
    pub fn authenticate<S>(&self, token: &str, accounts: &S) -> Result<Identity, AuthError>
    where
        S: AccountStore + ?Sized,
    {
        let claims = self.verify(token)?;
        let id = parse_id(&claims.sub).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let Some(identity) = accounts.find_by_id(id)? else {
            warn!("Token subject {id} no longer exists");
            return Err(AuthError::UnknownUser);
        };
        if !identity.active {
            warn!("Rejected deactivated account {}", identity.username);
            return Err(AuthError::AccountDeactivated);
        }

        debug!("Authenticated {} ({})", identity.username, identity.role);
        Ok(identity)
    }
}

/// Pull the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
