//! Child account endpoint (media type v5)

use serde_json::Value;

use super::client::{accept, encoded_path, json_response, BankClient};
use crate::error::Result;

const MEDIA_TYPE: &str = "application/vnd.sparebank1.v5+json; charset=utf-8";

pub struct ChildAccountsApi<'a> {
    client: &'a BankClient,
}

impl<'a> ChildAccountsApi<'a> {
    pub(crate) fn new(client: &'a BankClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, child_id: &str) -> Result<Value> {
        let path = encoded_path(&["accounts", "child", child_id])?;
        let resp = self.client.get(&path, &(), accept(MEDIA_TYPE)).await?;
        json_response(resp).await
    }
}
