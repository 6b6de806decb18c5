//! HTTP client for the Proxmox VE JSON API.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use crate::error::CliError;

/// Header carrying the CSRF token for ticket-authenticated writes. Header
/// names are case-insensitive and `HeaderMap` wants them lowercase.
const CSRF_HEADER: &str = "csrfpreventiontoken";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the client authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `user!name=value` API token.
    Token {
        user: String,
        name: String,
        value: String,
    },

    /// Username/password, exchanged for a ticket on connect.
    Password { user: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token { user, name, .. } => f
                .debug_struct("Token")
                .field("user", user)
                .field("name", name)
                .finish_non_exhaustive(),
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

/// A cluster node as listed by `GET /nodes`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatus {
    pub node: String,

    /// `online`, `offline` or `unknown`.
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub mem: u64,

    #[serde(default)]
    pub maxmem: u64,
}

impl NodeStatus {
    pub fn is_online(&self) -> bool {
        self.status.as_deref().map_or(true, |status| status == "online")
    }
}

/// A QEMU guest as listed by `GET /nodes/{node}/qemu`.
#[derive(Debug, Clone, Deserialize)]
pub struct VmStatus {
    pub vmid: u32,

    pub status: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub mem: u64,

    #[serde(default)]
    pub maxmem: u64,
}

impl VmStatus {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// An entry of `GET /cluster/tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterTask {
    pub upid: String,

    /// Set once the task has finished.
    #[serde(default)]
    pub endtime: Option<i64>,

    /// `OK` on success, otherwise the error message.
    #[serde(default)]
    pub status: Option<String>,
}

impl ClusterTask {
    pub fn is_finished(&self) -> bool {
        self.endtime.is_some()
    }

    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("OK")
    }
}

/// All Proxmox responses wrap their payload in `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    ticket: String,

    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

/// Error payload of a failed request.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: Option<String>,

    /// Per-parameter validation errors.
    #[serde(default)]
    errors: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ApiErrorResponse {
    fn describe(self, fallback: &str) -> String {
        let mut parts = Vec::new();
        if let Some(message) = self.message {
            parts.push(message.trim().to_string());
        }
        for (param, error) in self.errors.unwrap_or_default() {
            let error = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            parts.push(format!("{param}: {}", error.trim()));
        }
        if parts.is_empty() {
            fallback.to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// API client for a single Proxmox VE endpoint.
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProxmoxClient {
    /// Connect to the API at `base_url` (e.g. `https://pve1:8006/api2/json`).
    ///
    /// Password credentials are exchanged for a ticket here; tokens are sent
    /// with every request.
    pub async fn connect(
        base_url: &str,
        credentials: &Credentials,
        verify_ssl: bool,
    ) -> Result<Self, CliError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let headers = match credentials {
            Credentials::Token { user, name, value } => {
                let mut headers = HeaderMap::new();
                let mut auth = HeaderValue::from_str(&format!("PVEAPIToken={user}!{name}={value}"))
                    .context("Invalid API token format")?;
                auth.set_sensitive(true);
                headers.insert(AUTHORIZATION, auth);
                headers
            }
            Credentials::Password { user, password } => {
                let login = Self::build(&base_url, HeaderMap::new(), verify_ssl)?;
                let ticket = login.login(user, password).await?;
                debug!(user = %user, "Obtained API ticket");

                let mut headers = HeaderMap::new();
                let mut cookie = HeaderValue::from_str(&format!("PVEAuthCookie={}", ticket.ticket))
                    .context("Invalid ticket format")?;
                cookie.set_sensitive(true);
                headers.insert(COOKIE, cookie);
                headers.insert(
                    CSRF_HEADER,
                    HeaderValue::from_str(&ticket.csrf_token).context("Invalid CSRF token")?,
                );
                headers
            }
        };

        Self::build(&base_url, headers, verify_ssl)
    }

    fn build(base_url: &str, headers: HeaderMap, verify_ssl: bool) -> Result<Self, CliError> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_ssl)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn login(&self, user: &str, password: &str) -> Result<Ticket, CliError> {
        let response = self
            .client
            .post(self.url("/access/ticket"))
            .form(&[("username", user), ("password", password)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.get(self.url(path)).send().await?;

        self.handle_response(response).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).form(form).send().await?;

        self.handle_response(response).await
    }

    /// List cluster nodes.
    pub async fn nodes(&self) -> Result<Vec<NodeStatus>, CliError> {
        self.get("/nodes").await
    }

    /// List the QEMU guests of `node`.
    pub async fn node_vms(&self, node: &str) -> Result<Vec<VmStatus>, CliError> {
        self.get(&format!("/nodes/{node}/qemu?full=1")).await
    }

    /// Start an online migration of `vmid` from `node` to `target`, returning
    /// the task's UPID.
    pub async fn migrate(&self, node: &str, vmid: &str, target: &str) -> Result<String, CliError> {
        self.post_form(
            &format!("/nodes/{node}/qemu/{vmid}/migrate"),
            &[("target", target), ("online", "1"), ("with-local-disks", "1")],
        )
        .await
    }

    /// Recent tasks across the cluster.
    pub async fn cluster_tasks(&self) -> Result<Vec<ClusterTask>, CliError> {
        self.get("/cluster/tasks").await
    }

    /// Unwrap the `data` envelope of a successful response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<Envelope<T>>()
                .await
                .map(|envelope| envelope.data)
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {}", e)))
        } else {
            self.handle_error(response).await
        }
    }

    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status();

        if status.as_u16() == 401 {
            return Err(CliError::NotAuthenticated);
        }

        let fallback = status.canonical_reason().unwrap_or("Unknown error");
        let error_body: ApiErrorResponse = response.json().await.unwrap_or_default();

        Err(CliError::api(status.as_u16(), error_body.describe(fallback)))
    }
}
