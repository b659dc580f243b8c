//! HTTP client for the Crafty API.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::CraftyError;
use crate::models::{LoginPayload, LoginResponse, ServerList, ServerSummary};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a Crafty instance.
#[derive(Debug, Clone)]
pub struct CraftyConfig {
    /// Base URL (example: https://crafty:8443).
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification (Crafty ships a self-signed cert).
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
}

impl CraftyConfig {
    pub fn new(
        api_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            username: username.into(),
            password: password.into(),
            accept_invalid_certs: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Server power actions exposed by Crafty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
}

impl ServerAction {
    fn path_segment(self) -> &'static str {
        match self {
            ServerAction::Start => "start_server",
            ServerAction::Stop => "stop_server",
        }
    }
}

/// Crafty API client.
///
/// Every action performs a fresh login; Crafty tokens are cheap and this
/// avoids tracking token expiry.
pub struct CraftyClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl CraftyClient {
    /// Create a new client.
    pub fn new(config: CraftyConfig) -> Result<Self, CraftyError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start the server listening on `port`.
    pub async fn start_server(&self, port: u16) -> Result<(), CraftyError> {
        self.run_action(port, ServerAction::Start).await
    }

    /// Stop the server listening on `port`.
    pub async fn stop_server(&self, port: u16) -> Result<(), CraftyError> {
        self.run_action(port, ServerAction::Stop).await
    }

    async fn run_action(&self, port: u16, action: ServerAction) -> Result<(), CraftyError> {
        let bearer = self.login().await?;
        let server = self.find_server(&bearer, port).await?;
        self.send_action(&bearer, &server, action).await
    }

    /// Log in and return the `Authorization` header value.
    async fn login(&self) -> Result<String, CraftyError> {
        let url = format!("{}/api/v2/auth/login", self.base_url);
        let payload = LoginPayload {
            username: self.username.clone(),
            password: self.password.clone(),
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!(status, body = %body, "Crafty login failed");
            return Err(CraftyError::Login(format!("status {}: {}", status, body)));
        }

        let login: LoginResponse = response.json().await?;
        match login.data {
            Some(data) if !data.token.is_empty() => Ok(format!("Bearer {}", data.token)),
            _ => Err(CraftyError::Login(format!(
                "no token in response (status={})",
                login.status
            ))),
        }
    }

    /// List every server known to Crafty.
    pub async fn list_servers(&self) -> Result<Vec<ServerSummary>, CraftyError> {
        let bearer = self.login().await?;
        self.fetch_servers(&bearer).await
    }

    async fn fetch_servers(&self, bearer: &str) -> Result<Vec<ServerSummary>, CraftyError> {
        let url = format!("{}/api/v2/servers", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, bearer)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error("/api/v2/servers", response).await);
        }

        let list: ServerList = response.json().await?;
        debug!(server_count = list.data.len(), "Fetched Crafty servers");
        Ok(list.data)
    }

    async fn find_server(&self, bearer: &str, port: u16) -> Result<ServerSummary, CraftyError> {
        self.fetch_servers(bearer)
            .await?
            .into_iter()
            .find(|s| s.server_port == port)
            .ok_or(CraftyError::NoSuchServer(port))
    }

    async fn send_action(
        &self,
        bearer: &str,
        server: &ServerSummary,
        action: ServerAction,
    ) -> Result<(), CraftyError> {
        let endpoint = format!(
            "/api/v2/servers/{}/action/{}",
            server.server_id,
            action.path_segment()
        );
        let url = format!("{}{}", self.base_url, endpoint);

        info!(
            server_id = %server.server_id,
            port = server.server_port,
            action = ?action,
            "Sending Crafty server action"
        );

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, bearer)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(&endpoint, response).await);
        }

        Ok(())
    }
}

async fn status_error(endpoint: &str, response: reqwest::Response) -> CraftyError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!(endpoint, status, body = %body, "Crafty request failed");
    CraftyError::Status {
        endpoint: endpoint.to_string(),
        status,
        body,
    }
}
