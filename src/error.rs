//! Error types for the SpareBank 1 client

use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No token has ever been acquired (or it was logged out).
    #[error("not authenticated; run `sparebank1 login` first")]
    NotAuthenticated,

    /// The redirect back from the authorization server was unusable.
    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("token exchange failed (HTTP {status}): {body}")]
    TokenExchange { status: u16, body: String },

    #[error("token refresh failed: {0}")]
    Refresh(#[source] RefreshError),

    /// The token endpoint answered 2xx but left out a required field.
    #[error("token response is missing `{0}`")]
    MalformedToken(&'static str),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("no authorization callback received within {0:?}")]
    CallbackTimeout(Duration),

    #[error("waiting for the authorization callback was cancelled")]
    CallbackCancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// Why a refresh did not produce a usable token.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("no token to refresh")]
    NoToken,

    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// 2xx response that did not carry a usable token.
    #[error("refresh response is missing `{0}`")]
    Malformed(&'static str),

    #[error("refreshed token expires at {expires_at}, inside the refresh window")]
    ShortLived { expires_at: i64 },

    #[error(transparent)]
    Transport(reqwest::Error),
}

impl From<RefreshError> for Error {
    fn from(err: RefreshError) -> Self {
        Error::Refresh(err)
    }
}
