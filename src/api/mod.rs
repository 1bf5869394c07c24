//! API client module for SpareBank 1 personal banking

pub mod accounts;
pub mod child_accounts;
pub mod client;
pub mod transactions;
pub mod transfers;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{FileTokenStore, TokenManager};
use crate::config::{Config, Credentials};
use crate::error::Result;

pub use accounts::{AccountFilter, AccountsApi};
pub use child_accounts::ChildAccountsApi;
pub use client::BankClient;
pub use transactions::{TransactionQuery, TransactionSource, TransactionsApi};
pub use transfers::{DebitTransfer, TransfersApi};

/// Entry point: one token manager, one transport, all endpoint groups.
#[derive(Clone)]
pub struct SpareBank1Api {
    client: BankClient,
}

impl SpareBank1Api {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self {
            client: BankClient::new(tokens),
        }
    }

    /// Wire everything up from a loaded [`Config`] and the environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = Credentials::resolve(config)?;
        let store = FileTokenStore::new(config.token_path()?);
        let tokens = TokenManager::new(credentials, config.endpoints()?, store)?
            .with_callback_timeout(config.callback_timeout());
        Ok(Self::new(Arc::new(tokens)))
    }

    /// See [`TokenManager::authenticate`].
    pub async fn authenticate<F>(&self, show_url: F, cancel: &CancellationToken) -> Result<()>
    where
        F: FnOnce(&str),
    {
        self.client.tokens().authenticate(show_url, cancel).await
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        self.client.tokens()
    }

    pub fn accounts(&self) -> AccountsApi<'_> {
        AccountsApi::new(&self.client)
    }

    pub fn transactions(&self) -> TransactionsApi<'_> {
        TransactionsApi::new(&self.client)
    }

    pub fn transfers(&self) -> TransfersApi<'_> {
        TransfersApi::new(&self.client)
    }

    pub fn child_accounts(&self) -> ChildAccountsApi<'_> {
        ChildAccountsApi::new(&self.client)
    }
}
