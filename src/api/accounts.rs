//! Accounts endpoints (`/accounts`, media type v5)

use serde_json::{json, Value};

use super::client::{accept, accept_and_send, encoded_path, json_response, BankClient};
use crate::error::Result;

const MEDIA_TYPE: &str = "application/vnd.sparebank1.v5+json; charset=utf-8";

/// Which account kinds `list` should include
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountFilter {
    pub include_nok_accounts: bool,
    pub include_currency_accounts: bool,
    pub include_bsu_accounts: bool,
    pub include_creditcard_accounts: bool,
    pub include_ask_accounts: bool,
    pub include_pension_accounts: bool,
}

impl Default for AccountFilter {
    fn default() -> Self {
        Self {
            include_nok_accounts: true,
            include_currency_accounts: false,
            include_bsu_accounts: false,
            include_creditcard_accounts: false,
            include_ask_accounts: false,
            include_pension_accounts: false,
        }
    }
}

impl AccountFilter {
    fn to_params(self) -> [(&'static str, bool); 6] {
        [
            ("includeNokAccounts", self.include_nok_accounts),
            ("includeCurrencyAccounts", self.include_currency_accounts),
            ("includeBsuAccounts", self.include_bsu_accounts),
            ("includeCreditcardAccounts", self.include_creditcard_accounts),
            ("includeAskAccounts", self.include_ask_accounts),
            ("includePensionAccounts", self.include_pension_accounts),
        ]
    }
}

pub struct AccountsApi<'a> {
    client: &'a BankClient,
}

impl<'a> AccountsApi<'a> {
    pub(crate) fn new(client: &'a BankClient) -> Self {
        Self { client }
    }

    /// List accounts; returns the `accounts` array (empty if absent).
    pub async fn list(&self, filter: AccountFilter) -> Result<Vec<Value>> {
        let resp = self
            .client
            .get("accounts", &filter.to_params(), accept(MEDIA_TYPE))
            .await?;
        let mut body = json_response(resp).await?;
        Ok(match body.get_mut("accounts").map(Value::take) {
            Some(Value::Array(accounts)) => accounts,
            _ => Vec::new(),
        })
    }

    /// Look up account keys for the given account numbers.
    pub async fn keys(&self, account_numbers: &[String]) -> Result<Value> {
        let params: Vec<(&str, &str)> = account_numbers
            .iter()
            .map(|n| ("accountNumber", n.as_str()))
            .collect();
        let resp = self
            .client
            .get("accounts/keys", &params, accept(MEDIA_TYPE))
            .await?;
        json_response(resp).await
    }

    pub async fn balance(&self, account_number: &str) -> Result<Value> {
        let resp = self
            .client
            .post(
                "accounts/balance",
                &json!({ "accountNumber": account_number }),
                accept_and_send(MEDIA_TYPE),
            )
            .await?;
        json_response(resp).await
    }

    pub async fn default_account(&self) -> Result<Value> {
        self.get_path("accounts/default").await
    }

    pub async fn get(&self, account_key: &str) -> Result<Value> {
        self.get_path(&encoded_path(&["accounts", account_key])?)
            .await
    }

    pub async fn roles(&self, account_key: &str) -> Result<Value> {
        self.get_path(&encoded_path(&["accounts", account_key, "roles"])?)
            .await
    }

    pub async fn details(&self, account_key: &str) -> Result<Value> {
        self.get_path(&encoded_path(&["accounts", account_key, "details"])?)
            .await
    }

    async fn get_path(&self, path: &str) -> Result<Value> {
        let resp = self.client.get(path, &(), accept(MEDIA_TYPE)).await?;
        json_response(resp).await
    }
}
