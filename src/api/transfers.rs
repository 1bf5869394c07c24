//! Transfer endpoints (`/transfer`, media type v1)

use chrono::{Local, NaiveDate};
use serde_json::{json, Value};

use super::client::{accept_and_send, json_response, BankClient};
use crate::error::Result;

const MEDIA_TYPE: &str = "application/vnd.sparebank1.v1+json; charset=utf-8";

fn due_date_or_today(due_date: Option<NaiveDate>) -> String {
    due_date
        .unwrap_or_else(|| Local::now().date_naive())
        .format("%Y-%m-%d")
        .to_string()
}

/// Transfer between two of the user's own accounts
#[derive(Debug, Clone, PartialEq)]
pub struct DebitTransfer {
    pub amount: f64,
    pub from_account: String,
    pub to_account: String,
    pub currency_code: String,
    pub due_date: Option<NaiveDate>,
    pub message: Option<String>,
}

impl DebitTransfer {
    pub fn new(amount: f64, from_account: impl Into<String>, to_account: impl Into<String>) -> Self {
        Self {
            amount,
            from_account: from_account.into(),
            to_account: to_account.into(),
            currency_code: "NOK".to_string(),
            due_date: None,
            message: None,
        }
    }

    fn to_body(&self) -> Value {
        let mut body = json!({
            "amount": self.amount.to_string(),
            "fromAccount": self.from_account,
            "toAccount": self.to_account,
            "currencyCode": self.currency_code,
            "dueDate": due_date_or_today(self.due_date),
        });
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            body["message"] = Value::from(message);
        }
        body
    }
}

pub struct TransfersApi<'a> {
    client: &'a BankClient,
}

impl<'a> TransfersApi<'a> {
    pub(crate) fn new(client: &'a BankClient) -> Self {
        Self { client }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(path, body, accept_and_send(MEDIA_TYPE))
            .await?;
        json_response(resp).await
    }

    /// Pay down a credit card from an account.
    pub async fn to_credit_card(
        &self,
        amount: f64,
        from_account: &str,
        credit_card_account_id: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<Value> {
        let body = json!({
            "amount": amount,
            "fromAccount": from_account,
            "creditCardAccountId": credit_card_account_id,
            "dueDate": due_date_or_today(due_date),
        });
        self.post("transfer/creditcard/transferTo", &body).await
    }

    pub async fn between_accounts(&self, transfer: &DebitTransfer) -> Result<Value> {
        self.post("transfer/debit", &transfer.to_body()).await
    }

    pub async fn to_pension(
        &self,
        amount: f64,
        from_account: &str,
        policy_number: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<Value> {
        let body = json!({
            "amount": amount.to_string(),
            "fromAccount": from_account,
            "policyNumber": policy_number,
            "dueDate": due_date_or_today(due_date),
        });
        self.post("transfer/pension", &body).await
    }
}
