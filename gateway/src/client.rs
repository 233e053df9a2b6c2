//! HTTP client and configuration for the gateway under test

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use swarm_bench_core::ActionError;
use thiserror::Error;

/// Gateway configuration validation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayConfigError {
    /// A required configuration field is missing.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The base URL is not an http(s) URL.
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    /// A timeout value is out of acceptable range.
    #[error("invalid timeout: {0:?}")]
    InvalidTimeout(Duration),

    /// The HTTP client could not be constructed.
    #[error("cannot build HTTP client: {0}")]
    Client(String),
}

/// Connection settings for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL, e.g. `http://localhost:8000`
    pub base_url: String,

    /// Login user name
    pub username: String,

    /// Login password
    pub password: String,

    /// Request timeout
    #[serde(with = "swarm_bench_core::config::duration_secs")]
    pub request_timeout: Duration,

    /// Connection timeout
    #[serde(with = "swarm_bench_core::config::duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            username: "testuser".to_string(),
            password: "testpass".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl GatewayConfig {
    /// Create a config for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        if self.base_url.is_empty() {
            return Err(GatewayConfigError::MissingField("base_url"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(GatewayConfigError::InvalidUrl(self.base_url.clone()));
        }
        if self.username.is_empty() {
            return Err(GatewayConfigError::MissingField("username"));
        }

        // 100ms to 10m for requests, 100ms to 5m for connects
        if self.request_timeout < Duration::from_millis(100)
            || self.request_timeout > Duration::from_secs(600)
        {
            return Err(GatewayConfigError::InvalidTimeout(self.request_timeout));
        }
        if self.connect_timeout < Duration::from_millis(100)
            || self.connect_timeout > Duration::from_secs(300)
        {
            return Err(GatewayConfigError::InvalidTimeout(self.connect_timeout));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
}

/// Thin wrapper over a shared `reqwest::Client`.
///
/// One client (and its connection pool) serves every virtual user; per-user
/// state such as the bearer token lives in the user's session.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Build a client from a validated configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayConfigError::Client(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Configuration the client was built from.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// `GET path`, returning the status code.
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<StatusCode, ActionError> {
        self.send(self.http.get(self.url(path)), token).await
    }

    /// `POST path` with a JSON body, returning the status code.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        token: Option<&str>,
    ) -> Result<StatusCode, ActionError> {
        self.send(self.http.post(self.url(path)).json(body), token)
            .await
    }

    /// Log in with the configured credentials and return the access token.
    pub async fn login(&self) -> Result<String, ActionError> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({
                "username": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::status(status.as_u16(), "login rejected"));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| ActionError::failed(format!("invalid login response: {}", e)))?;
        body.access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ActionError::failed("login response carried no access_token"))
    }

    async fn send(
        &self,
        request: RequestBuilder,
        token: Option<&str>,
    ) -> Result<StatusCode, ActionError> {
        let request = match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        Ok(response.status())
    }

    fn transport_error(&self, error: reqwest::Error) -> ActionError {
        if error.is_timeout() {
            ActionError::Timeout(self.config.request_timeout)
        } else {
            ActionError::Transport(error.to_string())
        }
    }
}

/// Fail unless `status` is a 2xx.
pub fn expect_success(status: StatusCode, what: &str) -> Result<(), ActionError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ActionError::status(status.as_u16(), what))
    }
}
