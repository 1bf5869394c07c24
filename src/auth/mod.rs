//! Authentication for the SpareBank 1 API
//!
//! Implements the OAuth2 authorization-code grant: the user approves
//! access in a browser, the bank redirects to a local listener, and the
//! code is exchanged for an access/refresh token pair that is persisted
//! and refreshed ahead of expiry.

pub mod callback;
pub mod oauth;
pub mod tokens;

pub use callback::CallbackListener;
pub use oauth::{TokenManager, DEFAULT_REFRESH_THRESHOLD};
pub use tokens::{FileTokenStore, Token, TokenStore};
