//! SpareBank 1 personal banking API client
//!
//! OAuth2 authorization-code login with a local redirect listener,
//! persisted tokens refreshed ahead of expiry, and thin wrappers for the
//! accounts, transactions, transfers and child-account endpoints.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

pub use api::SpareBank1Api;
pub use auth::{Token, TokenManager};
pub use config::{Config, Credentials, Endpoints};
pub use error::{Error, RefreshError, Result};
