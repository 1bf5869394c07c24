//! OAuth2 authorization-code flow and token lifecycle

use std::time::Duration;

use chrono::DateTime;
use oauth2::{basic::BasicClient, AuthUrl, ClientId, CsrfToken, RedirectUrl, TokenUrl};
use reqwest::header::DATE;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::callback::CallbackListener;
use super::tokens::{unix_now, Token, TokenStore};
use crate::config::{Credentials, Endpoints};
use crate::error::{Error, RefreshError, Result};

/// Seconds of remaining validity every authenticated call insists on.
pub const DEFAULT_REFRESH_THRESHOLD: i64 = 60;

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Raw token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn expires_in(&self) -> Option<i64> {
        match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Owns the token and every transition it goes through.
///
/// Shared as `Arc<TokenManager>`. The token mutex is held across the
/// expiry check and any refresh, so concurrent callers never issue more
/// than one refresh request for the same token.
pub struct TokenManager {
    http: reqwest::Client,
    oauth: BasicClient,
    credentials: Credentials,
    endpoints: Endpoints,
    store: Box<dyn TokenStore>,
    token: Mutex<Option<Token>>,
    pending_state: Mutex<Option<CsrfToken>>,
    callback_timeout: Duration,
}

impl TokenManager {
    pub fn new(
        credentials: Credentials,
        endpoints: Endpoints,
        store: impl TokenStore + 'static,
    ) -> Result<Self> {
        let oauth = BasicClient::new(
            ClientId::new(credentials.client_id.clone()),
            None,
            AuthUrl::from_url(endpoints.auth_url.clone()),
            Some(TokenUrl::from_url(endpoints.token_url.clone())),
        )
        .set_redirect_uri(RedirectUrl::new(credentials.redirect_uri.clone())?);

        Ok(Self {
            http: reqwest::Client::new(),
            oauth,
            credentials,
            endpoints,
            store: Box::new(store),
            token: Mutex::new(None),
            pending_state: Mutex::new(None),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        })
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Snapshot of the token currently held in memory.
    pub async fn current_token(&self) -> Option<Token> {
        self.token.lock().await.clone()
    }

    /// Token as persisted, without loading it into memory.
    pub fn stored_token(&self) -> Result<Option<Token>> {
        self.store.load()
    }

    /// Restore the persisted token if there is one, otherwise run the
    /// authorization-code flow.
    pub async fn authenticate<F>(&self, show_url: F, cancel: &CancellationToken) -> Result<()>
    where
        F: FnOnce(&str),
    {
        if let Some(token) = self.store.load()? {
            tracing::info!("Imported token, valid until {}", token.valid_until());
            *self.token.lock().await = Some(token);
            self.ensure_valid(DEFAULT_REFRESH_THRESHOLD).await?;
            return Ok(());
        }
        self.authorize(show_url, cancel).await
    }

    /// Run the authorization-code flow regardless of any stored token.
    pub async fn authorize<F>(&self, show_url: F, cancel: &CancellationToken) -> Result<()>
    where
        F: FnOnce(&str),
    {
        // Bind first so a fast redirect cannot beat the listener.
        let listener = CallbackListener::bind(&self.credentials.redirect_uri).await?;
        let url = self.authorization_url().await;
        show_url(url.as_str());

        let target = listener.wait(self.callback_timeout, cancel).await?;
        self.complete_authorization(&target).await
    }

    /// Build the authorization URL, recording a fresh state for it.
    pub async fn authorization_url(&self) -> String {
        let (url, state) = self
            .oauth
            .authorize_url(CsrfToken::new_random)
            .add_extra_param("finInst", self.credentials.fin_inst.clone())
            .url();
        *self.pending_state.lock().await = Some(state);
        url.to_string()
    }

    /// Validate the redirect target and exchange its code.
    pub async fn complete_authorization(&self, target: &str) -> Result<()> {
        // Consumed whatever the outcome
        let expected = self
            .pending_state
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Authorization("no authorization in progress".into()))?;

        let url = Url::parse("http://localhost/")?.join(target)?;
        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut error_description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            let detail = match error_description {
                Some(desc) => format!("{error}: {desc}"),
                None => error,
            };
            tracing::warn!("Authorization server returned an error: {}", detail);
            return Err(Error::Authorization(detail));
        }

        let (code, state) = match (code.filter(|c| !c.is_empty()), state) {
            (Some(code), Some(state)) => (code, state),
            _ => {
                return Err(Error::Authorization(
                    "missing code or state in authorization response".into(),
                ))
            }
        };
        if state != *expected.secret() {
            tracing::warn!("Callback state does not match the pending authorization");
            return Err(Error::Authorization(
                "state mismatch, possible CSRF attempt".into(),
            ));
        }

        self.exchange_code(&code).await
    }

    /// Exchange an authorization code for a token and persist it.
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoints.token_url.as_str())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        let token = parse_token_response(resp, None).await?;
        let mut held = self.token.lock().await;
        self.commit(&mut held, token)
    }

    /// Replace the held token using its refresh token.
    pub async fn refresh(&self) -> Result<()> {
        let mut held = self.token.lock().await;
        self.refresh_locked(&mut held).await
    }

    /// Make sure the held token is good for at least `threshold_secs`,
    /// refreshing it first if not. Returns the access token to use.
    pub async fn ensure_valid(&self, threshold_secs: i64) -> Result<String> {
        self.ensure_valid_at(threshold_secs, unix_now()).await
    }

    /// [`TokenManager::ensure_valid`] against an explicit clock.
    pub async fn ensure_valid_at(&self, threshold_secs: i64, now: i64) -> Result<String> {
        let mut held = self.token.lock().await;
        let token = held.as_ref().ok_or(Error::NotAuthenticated)?;

        if token.expires_within(threshold_secs, now) {
            tracing::info!(
                "Token expires in {}s, refreshing",
                token.remaining_secs(now)
            );
            self.refresh_locked(&mut held).await?;
        }

        let token = held.as_ref().ok_or(Error::NotAuthenticated)?;
        if token.expires_within(threshold_secs, now) {
            return Err(RefreshError::ShortLived {
                expires_at: token.expires_at,
            }
            .into());
        }
        Ok(token.access_token.clone())
    }

    /// Forget the token, in memory and on disk.
    pub async fn logout(&self) -> Result<()> {
        let mut held = self.token.lock().await;
        self.store.clear()?;
        *held = None;
        Ok(())
    }

    async fn refresh_locked(&self, held: &mut Option<Token>) -> Result<()> {
        let current = held.as_ref().ok_or(RefreshError::NoToken)?;

        let resp = self
            .http
            .post(self.endpoints.token_url.as_str())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(RefreshError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!("Token refresh rejected (HTTP {})", status.as_u16());
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let token = parse_token_response(resp, Some(current.refresh_token.as_str()))
            .await
            .map_err(|err| match err {
                Error::MalformedToken(field) => RefreshError::Malformed(field).into(),
                Error::Http(err) => RefreshError::Transport(err).into(),
                other => other,
            })?;
        self.commit(held, token)
    }

    /// Persist first, then swap in memory, so a failed write keeps the old
    /// token everywhere.
    fn commit(&self, held: &mut Option<Token>, token: Token) -> Result<()> {
        self.store.save(&token)?;
        tracing::info!("New token, valid until {}", token.valid_until());
        *held = Some(token);
        Ok(())
    }
}

/// Turn a 2xx token response into a [`Token`], anchoring expiry on the
/// server's `Date` header. `previous_refresh` is carried over when a
/// refresh response omits a new refresh token.
async fn parse_token_response(
    resp: reqwest::Response,
    previous_refresh: Option<&str>,
) -> Result<Token> {
    let issued_at = resp
        .headers()
        .get(DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .unwrap_or_else(unix_now);

    let text = resp.text().await?;
    let body: TokenResponse = serde_json::from_str(&text).map_err(|err| {
        tracing::warn!("Token endpoint returned a non-JSON body: {}", err);
        Error::MalformedToken("body")
    })?;
    token_from_response(body, issued_at, previous_refresh)
}

fn token_from_response(
    body: TokenResponse,
    issued_at: i64,
    previous_refresh: Option<&str>,
) -> Result<Token> {
    let expires_in = body.expires_in().ok_or(Error::MalformedToken("expires_in"))?;
    let access_token = body
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(Error::MalformedToken("access_token"))?;
    let refresh_token = body
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous_refresh.map(str::to_string))
        .ok_or(Error::MalformedToken("refresh_token"))?;

    Ok(Token {
        access_token,
        expires_at: issued_at.saturating_add(expires_in),
        refresh_token,
    })
}

fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FileTokenStore;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Sun, 06 Nov 1994 08:49:37 GMT
    const T: i64 = 784_111_777;

    fn http_date(unix: i64) -> String {
        DateTime::from_timestamp(unix, 0)
            .unwrap()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    fn credentials(redirect_uri: &str) -> Credentials {
        Credentials {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            redirect_uri: redirect_uri.to_string(),
            fin_inst: "fid-test".to_string(),
        }
    }

    fn manager(server: &MockServer, dir: &TempDir) -> TokenManager {
        manager_with_redirect(server, dir, "http://127.0.0.1:8321/callback")
    }

    fn manager_with_redirect(server: &MockServer, dir: &TempDir, redirect: &str) -> TokenManager {
        TokenManager::new(
            credentials(redirect),
            Endpoints::from_base(&server.uri()).unwrap(),
            FileTokenStore::new(dir.path().join("token.json")),
        )
        .unwrap()
    }

    fn token(expires_at: i64) -> Token {
        Token {
            access_token: "old-access".to_string(),
            expires_at,
            refresh_token: "old-refresh".to_string(),
        }
    }

    async fn seed(mgr: &TokenManager, token: Token) {
        mgr.store.save(&token).unwrap();
        *mgr.token.lock().await = Some(token);
    }

    fn token_body(access: &str, refresh: &str, expires_in: i64) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": expires_in,
            "token_type": "Bearer",
        })
    }

    fn state_of(url: &str) -> String {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_parse_http_date() {
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(T));
        assert_eq!(parse_http_date(&http_date(T + 3500)), Some(T + 3500));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_token_from_response_fields() {
        let body = TokenResponse {
            access_token: Some("A".into()),
            refresh_token: None,
            expires_in: Some(serde_json::json!("3600")),
        };
        let token = token_from_response(body, T, Some("R0")).unwrap();
        assert_eq!(token.expires_at, T + 3600);
        assert_eq!(token.refresh_token, "R0");

        let no_access = TokenResponse {
            access_token: None,
            refresh_token: Some("R".into()),
            expires_in: Some(serde_json::json!(60)),
        };
        assert!(matches!(
            token_from_response(no_access, T, None),
            Err(Error::MalformedToken("access_token"))
        ));

        let no_expiry = TokenResponse {
            access_token: Some("A".into()),
            refresh_token: Some("R".into()),
            expires_in: None,
        };
        assert!(matches!(
            token_from_response(no_expiry, T, None),
            Err(Error::MalformedToken("expires_in"))
        ));

        // An exchange has no earlier refresh token to fall back on
        let no_refresh = TokenResponse {
            access_token: Some("A".into()),
            refresh_token: None,
            expires_in: Some(serde_json::json!(3600)),
        };
        assert!(matches!(
            token_from_response(no_refresh, T, None),
            Err(Error::MalformedToken("refresh_token"))
        ));
    }

    #[tokio::test]
    async fn test_exchange_without_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"access_token": "A", "expires_in": 3600}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let err = assert_err!(mgr.exchange_code("abc").await);
        assert!(matches!(err, Error::MalformedToken("refresh_token")));
        assert!(mgr.current_token().await.is_none());
        assert!(mgr.stored_token().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exchange_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let err = assert_err!(mgr.exchange_code("abc").await);
        assert!(matches!(err, Error::MalformedToken("body")));
        assert!(mgr.stored_token().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_non_json_body_keeps_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let before = token(unix_now() + 10);
        seed(&mgr, before.clone()).await;

        let err = assert_err!(mgr.ensure_valid(60).await);
        assert!(matches!(
            err,
            Error::Refresh(RefreshError::Malformed("body"))
        ));
        assert_eq!(mgr.current_token().await, Some(before.clone()));
        assert_eq!(mgr.stored_token().unwrap(), Some(before));
    }

    #[tokio::test]
    async fn test_authorization_url_parameters() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);

        let url = Url::parse(&mgr.authorization_url().await).unwrap();
        assert_eq!(url.path(), "/oauth/authorize");
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8321/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["finInst"], "fid-test");
        assert!(params["state"].len() >= 22);
        assert!(!params.contains_key("client_secret"));

        let again = mgr.authorization_url().await;
        assert_ne!(state_of(&again), params["state"]);
    }

    #[tokio::test]
    async fn test_state_mismatch_skips_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("A", "R", 3600)))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let _ = mgr.authorization_url().await;

        let err = assert_err!(
            mgr.complete_authorization("/callback?code=abc&state=forged")
                .await
        );
        assert!(matches!(err, Error::Authorization(_)));
        assert!(mgr.current_token().await.is_none());

        // The state was consumed by the failed attempt
        let err = assert_err!(mgr.complete_authorization("/callback?code=abc&state=forged").await);
        assert!(err.to_string().contains("no authorization in progress"));
    }

    #[tokio::test]
    async fn test_missing_code_or_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);

        let state = state_of(&mgr.authorization_url().await);
        let err = assert_err!(
            mgr.complete_authorization(&format!("/callback?state={state}"))
                .await
        );
        assert!(matches!(err, Error::Authorization(_)));

        let state = state_of(&mgr.authorization_url().await);
        let err = assert_err!(
            mgr.complete_authorization(&format!(
                "/callback?error=access_denied&error_description=user+said+no&state={state}"
            ))
            .await
        );
        assert!(err.to_string().contains("user said no"));
    }

    #[tokio::test]
    async fn test_exchange_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let err = assert_err!(mgr.exchange_code("abc").await);
        match err {
            Error::TokenExchange { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "invalid_grant");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(mgr.stored_token().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exchange_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "A"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let err = assert_err!(mgr.exchange_code("abc").await);
        assert!(matches!(err, Error::MalformedToken("expires_in")));
    }

    #[tokio::test]
    async fn test_end_to_end_code_exchange_then_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("client_secret=secret-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Date", http_date(T).as_str())
                    .set_body_json(token_body("A", "R", 3600)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=R"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Date", http_date(T + 3500).as_str())
                    .set_body_json(token_body("A2", "R2", 3600)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);

        let state = state_of(&mgr.authorization_url().await);
        assert_ok!(
            mgr.complete_authorization(&format!("/callback?code=abc&state={state}"))
                .await
        );

        let token = mgr.current_token().await.unwrap();
        assert_eq!(token.access_token, "A");
        assert_eq!(token.refresh_token, "R");
        assert_eq!(token.expires_at, T + 3600);
        assert_eq!(mgr.stored_token().unwrap(), Some(token));

        // Well inside the validity window: no refresh
        assert_eq!(mgr.ensure_valid_at(60, T + 100).await.unwrap(), "A");

        let access = mgr.ensure_valid_at(60, T + 3500).await.unwrap();
        assert_eq!(access, "A2");
        let refreshed = mgr.current_token().await.unwrap();
        assert_eq!(refreshed.expires_at, T + 3500 + 3600);
        assert_eq!(mgr.stored_token().unwrap(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_threshold_decides_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("new", "new-r", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);

        seed(&mgr, token(unix_now() + 120)).await;
        assert_eq!(mgr.ensure_valid(60).await.unwrap(), "old-access");

        seed(&mgr, token(unix_now() + 30)).await;
        assert_eq!(mgr.ensure_valid(60).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired refresh token"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let before = token(unix_now() + 10);
        seed(&mgr, before.clone()).await;

        let err = assert_err!(mgr.ensure_valid(60).await);
        assert!(matches!(
            err,
            Error::Refresh(RefreshError::Rejected { status: 401, .. })
        ));
        assert_eq!(mgr.current_token().await, Some(before.clone()));
        assert_eq!(mgr.stored_token().unwrap(), Some(before));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(100))
                    .set_body_json(token_body("fresh", "fresh-r", 3600)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(manager(&server, &dir));
        seed(&mgr, token(unix_now() + 5)).await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let mgr = Arc::clone(&mgr);
            tasks.spawn(async move { mgr.ensure_valid(60).await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), "fresh");
        }
    }

    #[tokio::test]
    async fn test_refresh_without_token() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);

        assert!(matches!(
            mgr.refresh().await,
            Err(Error::Refresh(RefreshError::NoToken))
        ));
        assert!(matches!(
            mgr.ensure_valid(60).await,
            Err(Error::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_short_lived_refresh_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("brief", "r", 30)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        seed(&mgr, token(unix_now())).await;

        let err = assert_err!(mgr.ensure_valid(60).await);
        assert!(matches!(
            err,
            Error::Refresh(RefreshError::ShortLived { .. })
        ));
        assert_eq!(mgr.current_token().await.unwrap().access_token, "brief");
    }

    #[tokio::test]
    async fn test_authenticate_restores_stored_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        let stored = token(unix_now() + 3600);
        mgr.store.save(&stored).unwrap();

        let cancel = CancellationToken::new();
        assert_ok!(
            mgr.authenticate(|_| panic!("must not prompt"), &cancel)
                .await
        );
        assert_eq!(mgr.current_token().await, Some(stored));
    }

    #[tokio::test]
    async fn test_authenticate_runs_browser_flow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("code=abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Date", http_date(T).as_str())
                    .set_body_json(token_body("A", "R", 3600)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let redirect = format!("http://127.0.0.1:{port}/callback");

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_with_redirect(&server, &dir, &redirect)
            .with_callback_timeout(Duration::from_secs(10));

        let cancel = CancellationToken::new();
        let result = mgr
            .authenticate(
                |url| {
                    let state = state_of(url);
                    tokio::spawn(async move {
                        use tokio::io::{AsyncReadExt, AsyncWriteExt};
                        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
                            .await
                            .unwrap();
                        let request = format!(
                            "GET /callback?code=abc&state={state} HTTP/1.1\r\nHost: localhost\r\n\r\n"
                        );
                        stream.write_all(request.as_bytes()).await.unwrap();
                        let mut sink = Vec::new();
                        let _ = stream.read_to_end(&mut sink).await;
                    });
                },
                &cancel,
            )
            .await;

        assert_ok!(result);
        let token = mgr.current_token().await.unwrap();
        assert_eq!(token.expires_at, T + 3600);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&server, &dir);
        seed(&mgr, token(unix_now() + 3600)).await;

        assert_ok!(mgr.logout().await);
        assert!(mgr.current_token().await.is_none());
        assert!(mgr.stored_token().unwrap().is_none());
    }
}
