//! IG REST API client with session management.
//!
//! Every domain call runs under the backoff executor. A call rejected with an
//! expired or missing token triggers one re-authentication and replays the
//! same request; that replay does not count against the retry budget.
//!
//! # Example
//!
//! ```ignore
//! use strangle_ig::{IgClient, IgClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = IgClient::new(IgClientConfig::new(url, api_key, identifier, password))?;
//!     client.create_session().await?;
//!
//!     let positions = client.get_positions().await?;
//!     println!("{} open positions", positions.len());
//!
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;
use strangle_core::retry::{self, BackoffConfig};
use strangle_core::BrokerConfig;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{IgError, Result};
use crate::session::{SessionState, SessionStore, SessionTokens};
use crate::types::{
    Account, ClosePositionRequest, DealConfirmation, MarketSummary, Navigation, OAuthToken,
    OpenPositionRequest, PositionEntry, RawAccountsResponse, RawClosePosition, RawDealReference,
    RawErrorBody, RawOpenPosition, RawPositionsResponse, RawSearchResponse, RawSessionResponse,
};

// =============================================================================
// Constants
// =============================================================================

/// IG live gateway.
pub const IG_LIVE_URL: &str = "https://api.ig.com/gateway/deal";

/// IG demo gateway.
pub const IG_DEMO_URL: &str = "https://demo-api.ig.com/gateway/deal";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the IG client.
#[derive(Clone)]
pub struct IgClientConfig {
    /// Base URL for the API.
    pub base_url: String,
    /// Application key sent with every request.
    pub api_key: SecretString,
    /// Login identifier.
    pub identifier: String,
    /// Login password, retained for re-authentication.
    pub password: SecretString,
    /// Account to switch to after login, if not the default.
    pub account_id: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Backoff applied to every call.
    pub retry: BackoffConfig,
}

impl std::fmt::Debug for IgClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgClientConfig")
            .field("base_url", &self.base_url)
            .field("identifier", &self.identifier)
            .field("account_id", &self.account_id)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl IgClientConfig {
    /// Creates a configuration with default timeout and retry settings.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        identifier: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: SecretString::from(api_key.into()),
            identifier: identifier.into(),
            password: SecretString::from(password.into()),
            account_id: None,
            timeout_secs: 30,
            retry: BackoffConfig::default(),
        }
    }

    /// Builds a client configuration from the `[broker]` section.
    #[must_use]
    pub fn from_broker(broker: &BrokerConfig) -> Self {
        Self::new(
            broker.base_url.clone(),
            broker.api_key.clone(),
            broker.identifier.clone(),
            broker.password.clone(),
        )
        .with_account_id(broker.account_id.clone())
        .with_timeout_secs(broker.timeout_secs)
        .with_retry(broker.retry.clone())
    }

    /// Sets the account to switch to after login.
    #[must_use]
    pub fn with_account_id(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the backoff configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: BackoffConfig) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// Request Plumbing
// =============================================================================

/// A fully-built request, kept so it can be replayed verbatim.
#[derive(Debug, Clone)]
struct ApiRequest {
    method: Method,
    path: String,
    version: u8,
    query: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
    method_override: Option<&'static str>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, version: u8) -> Self {
        Self {
            method,
            path: path.into(),
            version,
            query: Vec::new(),
            body: None,
            method_override: None,
        }
    }

    fn get(path: impl Into<String>, version: u8) -> Self {
        Self::new(Method::GET, path, version)
    }

    fn post(path: impl Into<String>, version: u8, body: serde_json::Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, path, version)
        }
    }

    fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }
}

/// Rejects identifiers that would escape their path segment.
fn validate_segment(id: &str) -> Result<&str> {
    if id.is_empty() {
        return Err(IgError::InvalidRequest("identifier cannot be empty".to_string()));
    }
    if id.contains("..")
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(IgError::InvalidRequest(format!("invalid identifier: {id}")));
    }
    Ok(id)
}

// =============================================================================
// IgClient
// =============================================================================

struct ClientInner {
    config: IgClientConfig,
    http: Client,
    session: SessionStore,
    /// Serializes every change of credential state.
    auth_lock: tokio::sync::Mutex<()>,
    heartbeat: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.get_mut().take() {
            handle.abort();
        }
    }
}

/// IG REST API client. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct IgClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for IgClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgClient")
            .field("base_url", &self.inner.config.base_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl IgClient {
    /// Creates an unauthenticated client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: IgClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IgError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                session: SessionStore::default(),
                auth_lock: tokio::sync::Mutex::new(()),
                heartbeat: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.config.base_url
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// Account the session is bound to.
    #[must_use]
    pub fn account_id(&self) -> Option<String> {
        self.inner.session.account_id()
    }

    // =========================================================================
    // Session Lifecycle
    // =========================================================================

    /// Logs in, switches to the configured account and starts the heartbeat.
    ///
    /// # Errors
    /// Returns `Authentication` if credentials are rejected, or a transport
    /// error once retries are exhausted.
    pub async fn create_session(&self) -> Result<()> {
        {
            let _guard = self.inner.auth_lock.lock().await;
            self.login_with_retry().await?;
        }

        if let Some(account_id) = self.inner.config.account_id.clone() {
            self.switch_account(&account_id).await?;
        }

        self.spawn_heartbeat();
        Ok(())
    }

    /// Ends the session and stops the heartbeat.
    ///
    /// # Errors
    /// Returns the transport error if the logout request fails; local
    /// session state is cleared either way.
    pub async fn logout(&self) -> Result<()> {
        if let Some(handle) = self.inner.heartbeat.lock().take() {
            handle.abort();
        }

        let _guard = self.inner.auth_lock.lock().await;
        if self.state() == SessionState::Unauthenticated {
            return Ok(());
        }

        let result = self
            .send(&ApiRequest::new(Method::DELETE, "/session", 1))
            .await
            .map(|_| ());
        self.inner.session.clear();
        info!("IG session closed");
        result
    }

    /// Switches the session to another account.
    ///
    /// # Errors
    /// Returns error if the broker refuses the switch.
    pub async fn switch_account(&self, account_id: &str) -> Result<()> {
        if self.account_id().as_deref() == Some(account_id) {
            return Ok(());
        }

        let request = ApiRequest {
            body: Some(json!({ "accountId": account_id, "defaultAccount": false })),
            ..ApiRequest::new(Method::PUT, "/session", 1)
        };
        let _: serde_json::Value = self.call("switch_account", request).await?;
        self.inner.session.set_account(account_id);
        info!(account_id, "Switched trading account");
        Ok(())
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// # Errors
    /// Returns `NotAuthenticated` without a session, or the API error.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.inner.auth_lock.lock().await;
        let refresh_token = self
            .inner
            .session
            .refresh_token()
            .ok_or(IgError::NotAuthenticated)?;

        let response = self
            .unauthenticated(Method::POST, "/session/refresh-token", 1)
            .json(&json!({ "refresh_token": refresh_token.expose_secret() }))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let token: OAuthToken = serde_json::from_str(&body)?;

        if !self.inner.session.refresh(token) {
            return Err(IgError::NotAuthenticated);
        }
        debug!("IG access token refreshed");
        Ok(())
    }

    async fn login_with_retry(&self) -> Result<()> {
        let config = &self.inner.config;
        retry::execute("create_session", &config.retry, IgError::is_retryable, || {
            self.login()
        })
        .await
        .map_err(IgError::from)
    }

    async fn login(&self) -> Result<()> {
        let config = &self.inner.config;
        let response = self
            .unauthenticated(Method::POST, "/session", 3)
            .json(&json!({
                "identifier": config.identifier,
                "password": config.password.expose_secret(),
            }))
            .send()
            .await?;

        let body = match Self::read_body(response).await {
            Ok(body) => body,
            Err(IgError::Api {
                status: 401 | 403,
                error_code,
                ..
            }) => return Err(IgError::Authentication(error_code)),
            Err(err) => return Err(err),
        };

        let raw: RawSessionResponse = serde_json::from_str(&body)?;
        let lifetime_secs = raw.oauth_token.lifetime_secs();
        info!(
            account_id = %raw.account_id,
            lifetime_secs,
            "IG session created"
        );
        self.inner
            .session
            .install(SessionTokens::new(raw.oauth_token, raw.account_id));
        Ok(())
    }

    /// Logs in again unless someone else already replaced the tokens
    /// since `seen_generation`.
    async fn reauthenticate(&self, seen_generation: u64) -> Result<()> {
        let _guard = self.inner.auth_lock.lock().await;
        if self.inner.session.generation() != seen_generation
            && self.state() == SessionState::Authenticated
        {
            return Ok(());
        }

        if let Err(err) = self.login_with_retry().await {
            if matches!(err.root(), IgError::Authentication(_)) {
                self.drop_session();
            }
            return Err(err);
        }
        if let Some(account_id) = self.inner.config.account_id.as_deref() {
            if self.account_id().as_deref() != Some(account_id) {
                let request = ApiRequest {
                    body: Some(json!({ "accountId": account_id, "defaultAccount": false })),
                    ..ApiRequest::new(Method::PUT, "/session", 1)
                };
                self.send(&request).await?;
                self.inner.session.set_account(account_id);
            }
        }
        Ok(())
    }

    /// Forgets the tokens and stops the heartbeat after the broker refused
    /// the stored credentials.
    fn drop_session(&self) {
        if let Some(handle) = self.inner.heartbeat.lock().take() {
            handle.abort();
        }
        self.inner.session.clear();
        error!("IG credentials rejected, session is now unauthenticated");
    }

    fn spawn_heartbeat(&self) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                let interval = match weak.upgrade() {
                    Some(inner) => inner.session.heartbeat_interval(),
                    None => break,
                };
                tokio::time::sleep(interval).await;

                let Some(inner) = weak.upgrade() else { break };
                IgClient { inner }.heartbeat().await;
            }
        });

        if let Some(previous) = self.inner.heartbeat.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn heartbeat(&self) {
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "Token refresh failed, re-authenticating");
            let generation = self.inner.session.generation();
            if let Err(err) = self.reauthenticate(generation).await {
                error!(error = %err, "Re-authentication after failed refresh failed");
            }
        }
    }

    // =========================================================================
    // Transport
    // =========================================================================

    fn unauthenticated(&self, method: Method, path: &str, version: u8) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.inner.config.base_url, path);
        debug!(%method, %url, "IG request");
        self.inner
            .http
            .request(method, url)
            .header("X-IG-API-KEY", self.inner.config.api_key.expose_secret())
            .header("VERSION", version.to_string())
            .header("Accept", "application/json; charset=UTF-8")
    }

    async fn send(&self, request: &ApiRequest) -> Result<String> {
        let (access_token, account_id) =
            self.inner.session.bearer().ok_or(IgError::NotAuthenticated)?;

        let mut builder = self
            .unauthenticated(request.method.clone(), &request.path, request.version)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("IG-ACCOUNT-ID", account_id);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(method) = request.method_override {
            builder = builder.header("_method", method);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        Self::read_body(response).await
    }

    /// Converts non-success statuses into typed errors.
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 429 {
            return Err(IgError::RateLimit(text));
        }

        if !status.is_success() {
            let error_code = serde_json::from_str::<RawErrorBody>(&text)
                .map(|b| b.error_code)
                .unwrap_or_default();
            if error_code.contains("exceeded-api-key-allowance")
                || error_code.contains("exceeded-account-allowance")
            {
                return Err(IgError::RateLimit(error_code));
            }
            return Err(IgError::api(status.as_u16(), error_code, text));
        }

        Ok(text)
    }

    /// Sends once; on an expired token re-authenticates and replays once per call.
    async fn send_with_replay(
        &self,
        operation: &str,
        request: &ApiRequest,
        replayed: &AtomicBool,
    ) -> Result<String> {
        let generation = self.inner.session.generation();
        match self.send(request).await {
            Err(err) if err.is_auth_expired() && !replayed.load(Ordering::SeqCst) => {
                warn!(
                    operation,
                    error_code = err.error_code().unwrap_or_default(),
                    "Session token rejected, re-authenticating and replaying"
                );
                self.reauthenticate(generation).await?;
                replayed.store(true, Ordering::SeqCst);
                self.send(request).await
            }
            other => other,
        }
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, request: ApiRequest) -> Result<T> {
        let replayed = AtomicBool::new(false);
        let (request, replayed) = (&request, &replayed);

        let body = retry::execute(
            operation,
            &self.inner.config.retry,
            IgError::is_retryable,
            move || async move { self.send_with_replay(operation, request, replayed).await },
        )
        .await?;

        let body = if body.trim().is_empty() { "null" } else { &body };
        Ok(serde_json::from_str(body)?)
    }

    // =========================================================================
    // Market Endpoints
    // =========================================================================

    /// Lists the children of a navigation node, or the root when `None`.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn navigate_markets(&self, node_id: Option<&str>) -> Result<Navigation> {
        let path = match node_id {
            Some(id) => format!("/marketnavigation/{}", validate_segment(id)?),
            None => "/marketnavigation".to_string(),
        };
        self.call("navigate_markets", ApiRequest::get(path, 1)).await
    }

    /// Searches instruments by free text.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn search_markets(&self, term: &str) -> Result<Vec<MarketSummary>> {
        let request = ApiRequest::get("/markets", 1).query("searchTerm", term);
        let response: RawSearchResponse = self.call("search_markets", request).await?;
        Ok(response.markets)
    }

    // =========================================================================
    // Dealing Endpoints
    // =========================================================================

    /// Submits an entry order; returns the deal reference.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn open_position(&self, order: &OpenPositionRequest) -> Result<String> {
        let body = serde_json::to_value(RawOpenPosition::from(order))?;
        let response: RawDealReference = self
            .call("open_position", ApiRequest::post("/positions/otc", 2, body))
            .await?;
        info!(
            epic = %order.epic,
            size = %order.size,
            limit = %order.limit_level,
            deal_reference = %response.deal_reference,
            "Entry order submitted"
        );
        Ok(response.deal_reference)
    }

    /// Reduces or closes a position; returns the deal reference.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn close_position(&self, order: &ClosePositionRequest) -> Result<String> {
        let body = serde_json::to_value(RawClosePosition::from(order))?;
        let request = ApiRequest {
            method_override: Some("DELETE"),
            ..ApiRequest::post("/positions/otc", 1, body)
        };
        let response: RawDealReference = self.call("close_position", request).await?;
        info!(
            deal_id = %order.deal_id,
            size = %order.size,
            limit = %order.limit_level,
            deal_reference = %response.deal_reference,
            "Exit order submitted"
        );
        Ok(response.deal_reference)
    }

    /// Fetches the confirmation for a deal reference.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn confirm_deal(&self, deal_reference: &str) -> Result<DealConfirmation> {
        let path = format!("/confirms/{}", validate_segment(deal_reference)?);
        self.call("confirm_deal", ApiRequest::get(path, 1)).await
    }

    // =========================================================================
    // Portfolio Endpoints
    // =========================================================================

    /// Lists open positions with their market snapshots.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn get_positions(&self) -> Result<Vec<PositionEntry>> {
        let response: RawPositionsResponse = self
            .call("get_positions", ApiRequest::get("/positions", 2))
            .await?;
        Ok(response.positions)
    }

    /// Lists accounts with balances.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn get_accounts(&self) -> Result<Vec<Account>> {
        let response: RawAccountsResponse = self
            .call("get_accounts", ApiRequest::get("/accounts", 1))
            .await?;
        Ok(response.accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_body(access: &str, expires_in: &str) -> serde_json::Value {
        json!({
            "clientId": "100",
            "accountId": "ACC1",
            "timezoneOffset": 0,
            "lightstreamerEndpoint": "https://ls.example.com",
            "oauthToken": {
                "access_token": access,
                "refresh_token": format!("{access}-refresh"),
                "scope": "profile",
                "token_type": "Bearer",
                "expires_in": expires_in
            }
        })
    }

    fn test_config(server: &MockServer) -> IgClientConfig {
        IgClientConfig::new(server.uri(), "app-key", "trader01", "hunter2").with_retry(
            BackoffConfig::default()
                .with_max_retries(2)
                .with_delays(Duration::from_millis(1), Duration::from_millis(5))
                .with_jitter_ratio(0.0),
        )
    }

    async fn mount_session(server: &MockServer, expected_logins: u64) {
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(header("VERSION", "3"))
            .and(header("X-IG-API-KEY", "app-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body("tok", "60")))
            .expect(expected_logins)
            .mount(server)
            .await;
    }

    async fn connected_client(server: &MockServer, expected_logins: u64) -> IgClient {
        mount_session(server, expected_logins).await;
        let client = IgClient::new(test_config(server)).unwrap();
        client.create_session().await.unwrap();
        client
    }

    // ==================== Config Tests ====================

    #[test]
    fn test_config_from_broker_section() {
        let broker = BrokerConfig {
            api_key: "k".to_string(),
            identifier: "id".to_string(),
            password: "pw".to_string(),
            account_id: Some("ACC2".to_string()),
            timeout_secs: 12,
            ..BrokerConfig::default()
        };
        let config = IgClientConfig::from_broker(&broker);
        assert_eq!(config.account_id.as_deref(), Some("ACC2"));
        assert_eq!(config.timeout_secs, 12);
        assert!(!format!("{config:?}").contains("pw"));
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("OP.D.SPX1.5800P.IP").is_ok());
        assert!(validate_segment("ABCDEF123").is_ok());
        assert!(validate_segment("../session").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("").is_err());
    }

    #[test]
    fn test_urls() {
        assert!(IG_LIVE_URL.starts_with("https://"));
        assert!(IG_DEMO_URL.starts_with("https://"));
    }

    // ==================== Session Tests ====================

    #[tokio::test]
    async fn test_create_session_stores_tokens() {
        let server = MockServer::start().await;
        let client = connected_client(&server, 1).await;

        assert_eq!(client.state(), SessionState::Authenticated);
        assert_eq!(client.account_id().as_deref(), Some("ACC1"));
    }

    #[tokio::test]
    async fn test_bad_credentials_are_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "errorCode": "error.security.invalid-details" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = IgClient::new(test_config(&server)).unwrap();
        let err = client.create_session().await.unwrap_err();
        assert!(matches!(
            err.root(),
            IgError::Authentication(code) if code.contains("invalid-details")
        ));
        assert_eq!(client.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_calls_require_session() {
        let server = MockServer::start().await;
        let client = IgClient::new(test_config(&server)).unwrap();
        let err = client.get_positions().await.unwrap_err();
        assert!(matches!(err.root(), IgError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_account_switch_after_login() {
        let server = MockServer::start().await;
        mount_session(&server, 1).await;
        Mock::given(method("PUT"))
            .and(path("/session"))
            .and(body_partial_json(json!({ "accountId": "ACC2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server).with_account_id(Some("ACC2".to_string()));
        let client = IgClient::new(config).unwrap();
        client.create_session().await.unwrap();
        assert_eq!(client.account_id().as_deref(), Some("ACC2"));
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body("tok", "2")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/refresh-token"))
            .and(body_partial_json(json!({ "refresh_token": "tok-refresh" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok2",
                "refresh_token": "tok2-refresh",
                "scope": "profile",
                "token_type": "Bearer",
                "expires_in": "60"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts"))
            .and(header("Authorization", "Bearer tok2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = IgClient::new(test_config(&server)).unwrap();
        client.create_session().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(client.get_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let server = MockServer::start().await;
        let client = connected_client(&server, 1).await;
        Mock::given(method("DELETE"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client.logout().await.unwrap();
        assert_eq!(client.state(), SessionState::Unauthenticated);
        // second logout is a no-op
        client.logout().await.unwrap();
    }

    // ==================== Replay & Retry Tests ====================

    #[tokio::test]
    async fn test_expired_token_is_replayed_after_reauth() {
        let server = MockServer::start().await;
        mount_session(&server, 2).await;

        // no retry budget at all: the replay must not consume one
        let config = test_config(&server).with_retry(BackoffConfig::no_retry());
        let client = IgClient::new(config).unwrap();
        client.create_session().await.unwrap();

        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "errorCode": "error.security.oauth-token-invalid" })),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "positions": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let positions = client.get_positions().await.unwrap();
        assert!(positions.is_empty());
        assert_eq!(client.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_second_auth_failure_surfaces() {
        let server = MockServer::start().await;
        let client = connected_client(&server, 2).await;

        Mock::given(method("GET"))
            .and(path("/accounts"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "errorCode": "error.security.client-token-missing" })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let err = client.get_accounts().await.unwrap_err();
        assert!(err.is_auth_expired());
        assert!(matches!(err, IgError::Retry { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_rejected_relogin_clears_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body("tok", "60")))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "errorCode": "error.security.invalid-details" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "errorCode": "error.security.oauth-token-invalid" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = IgClient::new(test_config(&server)).unwrap();
        client.create_session().await.unwrap();
        assert_eq!(client.state(), SessionState::Authenticated);

        let err = client.get_accounts().await.unwrap_err();
        assert!(matches!(
            err.root(),
            IgError::Authentication(code) if code.contains("invalid-details")
        ));
        assert_eq!(client.state(), SessionState::Unauthenticated);
        assert!(client.inner.heartbeat.lock().is_none());

        // Nothing is sent on stale tokens afterwards.
        let err = client.get_accounts().await.unwrap_err();
        assert!(matches!(err.root(), IgError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        let client = connected_client(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/markets"))
            .and(query_param("searchTerm", "US 500"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "markets": [
                    { "epic": "IX.D.SPTRD.DAILY.IP", "instrumentName": "US 500", "bid": 5799.5, "offer": 5800.5, "marketStatus": "TRADEABLE" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let markets = client.search_markets("US 500").await.unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].mid(), Some(dec!(5800)));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        let client = connected_client(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/confirms/REF1"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({ "errorCode": "error.confirms.deal-not-found" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client.confirm_deal("REF1").await.unwrap_err();
        assert_eq!(err.error_code(), Some("error.confirms.deal-not-found"));
        assert!(!err.is_retryable());
    }

    // ==================== Dealing Tests ====================

    #[tokio::test]
    async fn test_open_and_close_position() {
        let server = MockServer::start().await;
        let client = connected_client(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/positions/otc"))
            .and(header("VERSION", "2"))
            .and(body_partial_json(json!({ "epic": "OP.D.SPX1.5750P.IP", "direction": "BUY" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "dealReference": "OPEN1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/positions/otc"))
            .and(header("_method", "DELETE"))
            .and(body_partial_json(json!({ "dealId": "DI1", "direction": "SELL" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "dealReference": "CLOSE1" })))
            .expect(1)
            .mount(&server)
            .await;

        let open = OpenPositionRequest {
            epic: "OP.D.SPX1.5750P.IP".to_string(),
            expiry: "DFB".to_string(),
            currency: "USD".to_string(),
            size: dec!(25),
            limit_level: dec!(4),
        };
        assert_eq!(client.open_position(&open).await.unwrap(), "OPEN1");

        let close = ClosePositionRequest {
            deal_id: "DI1".to_string(),
            size: dec!(12.5),
            limit_level: dec!(1),
        };
        assert_eq!(client.close_position(&close).await.unwrap(), "CLOSE1");
    }

    #[tokio::test]
    async fn test_positions_and_navigation_parsing() {
        let server = MockServer::start().await;
        let client = connected_client(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "positions": [{
                    "position": {
                        "dealId": "DI1", "dealReference": "OPEN1", "size": 25,
                        "level": 2.0, "direction": "BUY", "currency": "USD"
                    },
                    "market": {
                        "epic": "OP.D.SPX1.5750P.IP", "instrumentName": "US 500 5750 PUT",
                        "expiry": "DFB", "bid": 1.8, "offer": 2.2, "marketStatus": "TRADEABLE"
                    }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/marketnavigation/195235"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [{ "id": "195236", "name": "Daily" }],
                "markets": null
            })))
            .mount(&server)
            .await;

        let positions = client.get_positions().await.unwrap();
        assert_eq!(positions[0].position.deal_reference.as_deref(), Some("OPEN1"));
        assert_eq!(positions[0].market.bid, Some(dec!(1.8)));

        let nav = client.navigate_markets(Some("195235")).await.unwrap();
        assert_eq!(nav.nodes().len(), 1);
        assert!(nav.markets().is_empty());
    }
}
