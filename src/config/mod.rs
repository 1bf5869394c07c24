//! Configuration and credential lookup

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.sparebank1.no";
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// On-disk configuration (`config.toml`)
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    /// Financial institution id (`finInst`)
    pub fin_inst: Option<String>,
    /// Where the token is persisted; defaults to the data dir
    pub token_path: Option<PathBuf>,
    /// Override for the API host, mostly useful against a test server
    pub base_url: Option<String>,
    pub callback_timeout_secs: Option<u64>,
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("no", "sparebank1", "sparebank1")
            .ok_or_else(|| Error::Config("could not determine config directory".into()))
    }

    /// Get config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.token_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("token.json")),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(
            self.callback_timeout_secs
                .unwrap_or(DEFAULT_CALLBACK_TIMEOUT_SECS),
        )
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::from_base(self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))
    }
}

/// Client identity registered with the bank
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub fin_inst: String,
}

impl Credentials {
    /// Resolve credentials from the environment, falling back to `config`.
    pub fn resolve(config: &Config) -> Result<Self> {
        Self::resolve_with(config, |key| std::env::var(key).ok())
    }

    /// Like [`Credentials::resolve`] with an explicit environment lookup.
    pub fn resolve_with<F>(config: &Config, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut pick = |var: &'static str, fallback: &Option<String>| {
            let value = env(var)
                .filter(|v| !v.is_empty())
                .or_else(|| fallback.clone().filter(|v| !v.is_empty()));
            if value.is_none() {
                missing.push(var);
            }
            value.unwrap_or_default()
        };

        let client_id = pick("CLIENT_ID", &config.client_id);
        let client_secret = pick("CLIENT_SECRET", &config.client_secret);
        let redirect_uri = pick("REDIRECT_URI", &config.redirect_uri);
        let fin_inst = pick("FIN_INST", &config.fin_inst);

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing {} (set the environment variable or the key in config.toml)",
                missing.join(", ")
            )));
        }

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            fin_inst,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .field("fin_inst", &self.fin_inst)
            .finish()
    }
}

/// OAuth2 and banking API endpoints
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub auth_url: Url,
    pub token_url: Url,
    pub api_url: Url,
}

impl Endpoints {
    pub fn from_base(base: &str) -> Result<Self> {
        let base = base.trim_end_matches('/');
        Ok(Self {
            auth_url: Url::parse(&format!("{base}/oauth/authorize"))?,
            token_url: Url::parse(&format!("{base}/oauth/token"))?,
            api_url: Url::parse(&format!("{base}/personal/banking"))?,
        })
    }
}
