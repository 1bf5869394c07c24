//! Authenticated HTTP client for the banking API
//!
//! Wraps reqwest::Client with token validation and bearer injection on
//! every request.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Serialize;
use url::Url;

use crate::auth::{TokenManager, DEFAULT_REFRESH_THRESHOLD};
use crate::error::{Error, Result};

pub const USER_AGENT_VALUE: &str = "SpareBank1API/1.0";

/// Client for `{api_url}/...` that never sends a request without a valid
/// token.
#[derive(Clone)]
pub struct BankClient {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    api_base: String,
}

impl BankClient {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        let api_base = tokens
            .endpoints()
            .api_url
            .as_str()
            .trim_end_matches('/')
            .to_string();
        Self {
            http: tokens.http().clone(),
            tokens,
            api_base,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Defaults, then caller headers, then the bearer token which callers
    /// cannot override.
    fn build_headers(&self, access_token: &str, extra: HeaderMap) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        for (name, value) in extra.iter() {
            if *name == AUTHORIZATION {
                tracing::debug!("Ignoring caller-supplied Authorization header");
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// GET `{api_url}/{path}` with query `params`.
    pub async fn get<P>(&self, path: &str, params: &P, headers: HeaderMap) -> Result<reqwest::Response>
    where
        P: Serialize + ?Sized,
    {
        let token = self.tokens.ensure_valid(DEFAULT_REFRESH_THRESHOLD).await?;
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .headers(self.build_headers(&token, headers)?)
            .query(params)
            .send()
            .await?;
        Ok(resp)
    }

    /// POST `{api_url}/{path}` with a JSON `body`.
    pub async fn post<B>(&self, path: &str, body: &B, headers: HeaderMap) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let token = self.tokens.ensure_valid(DEFAULT_REFRESH_THRESHOLD).await?;
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .headers(self.build_headers(&token, headers)?)
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }
}

/// Turn a non-success response into [`Error::Api`].
pub(crate) async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Check the status and decode the body as JSON.
pub(crate) async fn json_response(resp: reqwest::Response) -> Result<serde_json::Value> {
    Ok(check_response(resp).await?.json().await?)
}

/// Headers with a single `Accept` media type.
pub(crate) fn accept(media_type: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static(media_type));
    headers
}

/// `Accept` and `Content-Type` set to the same media type.
pub(crate) fn accept_and_send(media_type: &'static str) -> HeaderMap {
    let mut headers = accept(media_type);
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static(media_type),
    );
    headers
}

/// Relative API path from `segments`, each percent-encoded so an id can
/// never add segments or a query string.
pub(crate) fn encoded_path(segments: &[&str]) -> Result<String> {
    let mut url = Url::parse("http://localhost/")?;
    url.path_segments_mut()
        .map_err(|_| Error::Config("cannot build API path".into()))?
        .clear()
        .extend(segments);
    Ok(url.path().trim_start_matches('/').to_string())
}
