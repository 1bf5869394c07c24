//! Transactions endpoints (`/transactions`, media type v1)

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde_json::Value;

use super::client::{accept, check_response, encoded_path, json_response, BankClient};
use crate::error::Result;

const MEDIA_TYPE: &str = "application/vnd.sparebank1.v1+json; charset=utf-8";
const CSV_MEDIA_TYPE: &str = "application/csv;charset=UTF-8";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSource {
    Recent,
    Historic,
    All,
}

impl TransactionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recent => "RECENT",
            Self::Historic => "HISTORIC",
            Self::All => "ALL",
        }
    }
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RECENT" => Ok(Self::Recent),
            "HISTORIC" => Ok(Self::Historic),
            "ALL" => Ok(Self::All),
            other => Err(format!(
                "unknown transaction source: {}. Use: recent, historic, all",
                other
            )),
        }
    }
}

/// Filters shared by the plain and classified transaction listings
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub account_keys: Vec<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub row_limit: Option<u32>,
    pub transaction_source: Vec<TransactionSource>,
    pub enrich_with_payment_details: Option<bool>,
    /// Only sent by the classified listing
    pub enrich_with_merchant_logo: Option<bool>,
}

impl TransactionQuery {
    pub fn for_accounts<I, S>(account_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            account_keys: account_keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn to_params(&self, classified: bool) -> Vec<(&'static str, String)> {
        let mut params: Vec<(&'static str, String)> = self
            .account_keys
            .iter()
            .map(|k| ("accountKey", k.clone()))
            .collect();

        if let Some(from) = self.from_date {
            params.push(("fromDate", from.format(DATE_FORMAT).to_string()));
        }
        if let Some(to) = self.to_date {
            params.push(("toDate", to.format(DATE_FORMAT).to_string()));
        }
        if let Some(limit) = self.row_limit.filter(|l| *l > 0) {
            params.push(("rowLimit", limit.to_string()));
        }
        if !self.transaction_source.is_empty() {
            let sources: Vec<&str> = self
                .transaction_source
                .iter()
                .map(|s| s.as_str())
                .collect();
            params.push(("transactionSource", sources.join(", ")));
        }
        if let Some(enrich) = self.enrich_with_payment_details {
            params.push(("enrichWithPaymentDetails", enrich.to_string()));
        }
        if classified {
            if let Some(logo) = self.enrich_with_merchant_logo {
                params.push(("enrichWithMerchantLogo", logo.to_string()));
            }
        }
        params
    }
}

pub struct TransactionsApi<'a> {
    client: &'a BankClient,
}

impl<'a> TransactionsApi<'a> {
    pub(crate) fn new(client: &'a BankClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, query: &TransactionQuery) -> Result<Value> {
        let resp = self
            .client
            .get("transactions", &query.to_params(false), accept(MEDIA_TYPE))
            .await?;
        json_response(resp).await
    }

    /// Like `list`, with merchant classification.
    pub async fn list_classified(&self, query: &TransactionQuery) -> Result<Value> {
        let resp = self
            .client
            .get(
                "transactions/classified",
                &query.to_params(true),
                accept(MEDIA_TYPE),
            )
            .await?;
        json_response(resp).await
    }

    /// Booked transactions for one account in a period, as CSV text.
    pub async fn export_csv(
        &self,
        account_key: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<String> {
        let params = [
            ("accountKey", account_key.to_string()),
            ("fromDate", from_date.format(DATE_FORMAT).to_string()),
            ("toDate", to_date.format(DATE_FORMAT).to_string()),
        ];
        let resp = self
            .client
            .get("transactions/export", &params, accept(CSV_MEDIA_TYPE))
            .await?;
        Ok(check_response(resp).await?.text().await?)
    }

    pub async fn details(&self, transaction_id: &str) -> Result<Value> {
        let path = encoded_path(&["transactions", transaction_id, "details"])?;
        let resp = self.client.get(&path, &(), accept(MEDIA_TYPE)).await?;
        json_response(resp).await
    }

    pub async fn classified_details(
        &self,
        transaction_id: &str,
        enrich_with_merchant_data: Option<bool>,
    ) -> Result<Value> {
        let path = encoded_path(&["transactions", transaction_id, "details", "classified"])?;
        let params: Vec<(&str, String)> = enrich_with_merchant_data
            .map(|enrich| ("enrichWithMerchantData", enrich.to_string()))
            .into_iter()
            .collect();
        let resp = self.client.get(&path, &params, accept(MEDIA_TYPE)).await?;
        json_response(resp).await
    }
}
