//! Server configuration from the environment.

use anyhow::{Context, Result};
use groovy_docs_core::auth::{Hs256Verifier, JwksVerifier, TokenVerifier};
use groovy_docs_core::Role;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub data_dir: PathBuf,
    pub jwt_secret: Option<String>,
    pub jwks_url: Option<String>,
    pub dev_headers: bool,
    pub member_role: Role,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            jwt_secret: None,
            jwks_url: None,
            dev_headers: false,
            member_role: Role::Editor,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(var)
    }

    /// Build from any variable source; `from_env` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let member_role = match lookup("GROOVY_MEMBER_ROLE") {
            Some(raw) => raw
                .parse::<Role>()
                .with_context(|| format!("GROOVY_MEMBER_ROLE={}", raw))?,
            None => defaults.member_role,
        };
        let mut config = Self {
            addr: lookup("GROOVY_ADDR").unwrap_or(defaults.addr),
            data_dir: lookup("GROOVY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            jwt_secret: lookup("GROOVY_JWT_SECRET"),
            jwks_url: lookup("GROOVY_JWKS_URL"),
            dev_headers: lookup("GROOVY_DEV_HEADERS").map_or(false, |v| flag(&v)),
            member_role,
        };
        if config.jwt_secret.is_none() && config.jwks_url.is_none() && !config.dev_headers {
            tracing::warn!("no GROOVY_JWT_SECRET or GROOVY_JWKS_URL set, accepting development identity headers");
            config.dev_headers = true;
        }
        Ok(config)
    }

    /// Key set verification takes precedence over a shared secret.
    pub fn verifier(&self) -> Option<Arc<dyn TokenVerifier>> {
        if let Some(url) = &self.jwks_url {
            return Some(Arc::new(JwksVerifier::new(url.clone())));
        }
        self.jwt_secret
            .as_ref()
            .map(|secret| Arc::new(Hs256Verifier::new(secret.clone())) as Arc<dyn TokenVerifier>)
    }
}
