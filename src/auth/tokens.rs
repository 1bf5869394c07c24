//! Token storage and management

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Access/refresh token pair as persisted in `token.json`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    /// Unix seconds, derived from the server's clock
    pub expires_at: i64,
    pub refresh_token: String,
}

impl Token {
    /// True if fewer than `threshold_secs` remain at `now` (unix seconds).
    pub fn expires_within(&self, threshold_secs: i64, now: i64) -> bool {
        now >= self.expires_at.saturating_sub(threshold_secs)
    }

    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.expires_at.saturating_sub(now).max(0)
    }

    /// Expiry rendered in local time, for log lines and `status`.
    pub fn valid_until(&self) -> String {
        match Local.timestamp_opt(self.expires_at, 0).single() {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => self.expires_at.to_string(),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &"[redacted]")
            .finish()
    }
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Durable backing for the token held by [`super::TokenManager`]
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Token>>;
    /// Replace the stored token. Must never leave a half-written record.
    fn save(&self, token: &Token) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file store with write-to-temp-then-rename replacement
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("token.json");
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Token>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, token: &Token) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let payload = serde_json::to_vec(token)?;
        let temp_path = self.temp_path();

        let written = write_private(&temp_path, &payload)
            .and_then(|()| fs::rename(&temp_path, &self.path).map_err(Into::into));
        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_private(path: &Path, payload: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;

    // Restrictive permissions before any secret hits the disk
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(payload)?;
    file.sync_all()?;
    Ok(())
}
