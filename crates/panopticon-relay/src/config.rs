//! Relay configuration, read from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BIND: &str = "0.0.0.0:5000";
const DEFAULT_DB_PATH: &str = "panopticon.db";
const DEV_SECRET: &str = "panopticon_secret_change_in_production";
const DEFAULT_ISSUER: &str = "panopticon-chat";
const DEFAULT_AUDIENCE: &str = "panopticon-users";
const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Upper bound on the time between transport upgrade and admission.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 5;

/// Bearer credential settings.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEV_SECRET.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub jwt: JwtConfig,
    pub handshake_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            jwt: JwtConfig::default(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

impl RelayConfig {
    /// Read `PANOPTICON_BIND`, `PANOPTICON_DB`, `JWT_SECRET`, `JWT_ISSUER`,
    /// `JWT_AUDIENCE`, `JWT_TTL_SECS` and `HANDSHAKE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("JWT_SECRET not set, using the development secret");
                defaults.jwt.secret
            }
        };

        let config = Self {
            bind_addr: std::env::var("PANOPTICON_BIND").unwrap_or(defaults.bind_addr),
            db_path: std::env::var("PANOPTICON_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            jwt: JwtConfig {
                secret,
                issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.jwt.issuer),
                audience: std::env::var("JWT_AUDIENCE").unwrap_or(defaults.jwt.audience),
                ttl: secs_var("JWT_TTL_SECS").unwrap_or(defaults.jwt.ttl),
            },
            handshake_timeout: secs_var("HANDSHAKE_TIMEOUT_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.handshake_timeout),
        };

        info!(
            "Config: bind={} db={} issuer={} handshake_timeout={:?}",
            config.bind_addr,
            config.db_path.display(),
            config.jwt.issuer,
            config.handshake_timeout
        );
        config
    }
}

fn secs_var(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            warn!("Ignoring {name}={raw:?}: not a number of seconds");
            None
        }
    }
}
