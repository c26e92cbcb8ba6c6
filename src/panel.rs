use crate::config::{PanelConfig, PanelCredentials};
use crate::model::{ServerDescriptor, ServerResourceSample, ServerStatus};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const MAX_ERROR_BODY_CHARS: usize = 200;
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiScope {
    Application,
    Client,
}

impl fmt::Display for ApiScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => f.write_str("application"),
            Self::Client => f.write_str("client"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("{scope} API key is not configured (set {env_name})")]
    MissingCredential {
        scope: ApiScope,
        env_name: String,
    },
    #[error("panel request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("panel returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch_sample(&self, server_id: &str) -> Result<ServerResourceSample, PanelError>;
}

#[async_trait]
pub trait PanelApi: SampleSource {
    fn ensure_credentials(&self, _scopes: &[ApiScope]) -> Result<(), Vec<PanelError>> {
        Ok(())
    }

    async fn list_servers(&self) -> Result<Vec<ServerDescriptor>, PanelError>;
}

pub struct PanelClient {
    http: Client,
    base_url: String,
    credentials: PanelCredentials,
    application_key_env: String,
    client_key_env: String,
}

impl PanelClient {
    pub fn new(cfg: &PanelConfig, credentials: PanelCredentials) -> Result<Self, PanelError> {
        let http = Client::builder()
            .user_agent(concat!("panelwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim().trim_end_matches('/').to_string(),
            credentials,
            application_key_env: cfg.application_api_key_env.clone(),
            client_key_env: cfg.client_api_key_env.clone(),
        })
    }

    fn key(&self, scope: ApiScope) -> Result<&str, PanelError> {
        let (key, env_name) = match scope {
            ApiScope::Application => (&self.credentials.application_key, &self.application_key_env),
            ApiScope::Client => (&self.credentials.client_key, &self.client_key_env),
        };
        key.as_deref().ok_or_else(|| PanelError::MissingCredential {
            scope,
            env_name: env_name.clone(),
        })
    }

    fn servers_url(&self, page: u32) -> String {
        format!(
            "{}/api/application/servers?page={page}&per_page={PAGE_SIZE}",
            self.base_url
        )
    }

    fn resources_url(&self, server_id: &str) -> String {
        format!("{}/api/client/servers/{server_id}/resources", self.base_url)
    }

    async fn get(&self, url: &str, scope: ApiScope) -> Result<Response, PanelError> {
        let key = self.key(scope)?;
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .bearer_auth(key)
            .send()
            .await?;
        ensure_success(resp).await
    }
}

#[async_trait]
impl SampleSource for PanelClient {
    async fn fetch_sample(&self, server_id: &str) -> Result<ServerResourceSample, PanelError> {
        let resp = self
            .get(&self.resources_url(server_id), ApiScope::Client)
            .await?;
        let body: ResourcesResponse = resp.json().await?;
        Ok(body.attributes.resources.into_sample(server_id))
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    fn ensure_credentials(&self, scopes: &[ApiScope]) -> Result<(), Vec<PanelError>> {
        let missing: Vec<PanelError> = scopes
            .iter()
            .filter_map(|scope| self.key(*scope).err())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    async fn list_servers(&self) -> Result<Vec<ServerDescriptor>, PanelError> {
        let mut servers = Vec::new();
        let mut page = 1_u32;
        loop {
            let resp = self
                .get(&self.servers_url(page), ApiScope::Application)
                .await?;
            let body: ServerListResponse = resp.json().await?;
            servers.extend(body.data.into_iter().map(|item| item.attributes.into_descriptor()));

            let total_pages = body
                .meta
                .and_then(|m| m.pagination)
                .map(|p| p.total_pages)
                .unwrap_or(1);
            debug!(page, total_pages, fetched = servers.len(), "server list page");
            if page >= total_pages {
                break;
            }
            page += 1;
        }
        Ok(servers)
    }
}

async fn ensure_success(resp: Response) -> Result<Response, PanelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PanelError::Status {
        status: status.as_u16(),
        body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ServerListResponse {
    #[serde(default)]
    data: Vec<ServerListItem>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

#[derive(Debug, Deserialize)]
struct ServerListItem {
    attributes: ServerAttributes,
}

#[derive(Debug, Deserialize)]
struct ServerAttributes {
    uuid: String,
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limits: ServerLimits,
}

#[derive(Debug, Default, Deserialize)]
struct ServerLimits {
    #[serde(default)]
    memory: u64,
    #[serde(default)]
    disk: u64,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    attributes: ResourcesAttributes,
}

#[derive(Debug, Deserialize)]
struct ResourcesAttributes {
    #[serde(default)]
    resources: ResourceUsage,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceUsage {
    #[serde(default)]
    cpu_absolute: f64,
    #[serde(default)]
    memory_bytes: u64,
    #[serde(default)]
    disk_bytes: u64,
    #[serde(default)]
    network_rx_bytes: u64,
    #[serde(default)]
    network_tx_bytes: u64,
}

impl ServerAttributes {
    fn into_descriptor(self) -> ServerDescriptor {
        ServerDescriptor {
            status: ServerStatus::from_panel(self.status.as_deref()),
            id: self.uuid,
            display_name: self.name,
            memory_limit_mib: self.limits.memory,
            disk_limit_mib: self.limits.disk,
        }
    }
}

impl ResourceUsage {
    fn into_sample(self, server_id: &str) -> ServerResourceSample {
        ServerResourceSample {
            server_id: server_id.to_string(),
            cpu_percent: self.cpu_absolute.max(0.0),
            memory_used_bytes: self.memory_bytes,
            disk_used_bytes: self.disk_bytes,
            network_rx_bytes: self.network_rx_bytes,
            network_tx_bytes: self.network_tx_bytes,
        }
    }
}
