use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{DEFAULT_REGISTRY_URL, DEFAULT_USER_AGENT, SyncConfig};
use crate::error::SyncError;
use crate::http::{RetryPolicy, env_value_u64, env_value_usize, send_with_retry};
use crate::model::{DictionaryEntry, DictionaryKind, OrganizationRecord, OrganizationUnit};

/// Read-only view of the government registry.
pub trait RegistryApi {
    fn organizations(&mut self) -> Result<Vec<OrganizationRecord>>;
    /// `Ok(None)` when the registry has no record for `code`.
    fn organization(&mut self, code: &str) -> Result<Option<OrganizationRecord>>;
    /// Best-effort label match: the first search hit, if any.
    fn search(&mut self, preferred_label: &str) -> Result<Option<OrganizationRecord>>;
    fn dictionary(&mut self, kind: DictionaryKind) -> Result<Vec<DictionaryEntry>>;
    fn organization_tree(&mut self, code: &str) -> Result<Option<OrganizationUnit>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct RegistryClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl RegistryClientConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base_url: config.registry_url(),
            user_agent: config
                .registry
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: env_value_u64("REGISTRY_HTTP_TIMEOUT_MS", 30_000),
            max_retries: env_value_usize("REGISTRY_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("REGISTRY_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

pub struct RegistryClient {
    client: Client,
    config: RegistryClientConfig,
    request_count: usize,
}

impl RegistryClient {
    pub fn new(config: RegistryClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build registry HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/public/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// For lookups by code, where HTTP 404 means "no such organization".
    fn get_optional<T: DeserializeOwned>(&mut self, path: &str) -> Result<Option<T>> {
        let url = self.endpoint(path);
        let request = self.client.get(&url);
        Ok(self
            .send_for_envelope(&url, request)?
            .and_then(|envelope| envelope.data))
    }

    /// For listings and dictionaries: a 404 or an absent `data` field is
    /// an upstream failure, never an empty result.
    fn get_required<T: DeserializeOwned>(&mut self, path: &str) -> Result<T> {
        let url = self.endpoint(path);
        let request = self.client.get(&url);
        let envelope = self
            .send_for_envelope(&url, request)?
            .ok_or_else(|| SyncError::upstream(&url, "HTTP 404 Not Found"))?;
        require_data(&url, envelope)
    }

    /// `Ok(None)` on HTTP 404; any other failure status is an error.
    fn send_for_envelope<T: DeserializeOwned>(
        &mut self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Option<DataEnvelope<T>>> {
        let request = request
            .header("User-Agent", self.config.user_agent.clone())
            .header("Accept", "application/json");
        let policy = RetryPolicy::new(self.config.max_retries, self.config.retry_delay_ms);
        let response = send_with_retry(request, &policy, url, |attempt| {
            self.request_count += 1;
            debug!(url, attempt, "registry request");
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!(SyncError::upstream(url, format!("HTTP {status}")));
        }
        let envelope = response
            .json()
            .with_context(|| format!("failed to decode registry response from {url}"))?;
        Ok(Some(envelope))
    }
}

impl RegistryApi for RegistryClient {
    fn organizations(&mut self) -> Result<Vec<OrganizationRecord>> {
        self.get_required("organizations")
    }

    fn organization(&mut self, code: &str) -> Result<Option<OrganizationRecord>> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(None);
        }
        self.get_optional(&format!("organizations/{code}"))
    }

    fn search(&mut self, preferred_label: &str) -> Result<Option<OrganizationRecord>> {
        let url = self.endpoint("organizations/search");
        let request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "preferredLabel": preferred_label }));
        let envelope: DataEnvelope<Vec<OrganizationRecord>> = self
            .send_for_envelope(&url, request)?
            .ok_or_else(|| SyncError::upstream(&url, "HTTP 404 Not Found"))?;
        Ok(envelope.data.and_then(|hits| hits.into_iter().next()))
    }

    fn dictionary(&mut self, kind: DictionaryKind) -> Result<Vec<DictionaryEntry>> {
        self.get_required(&format!("metadata/dictionary/{}", kind.as_str()))
    }

    fn organization_tree(&mut self, code: &str) -> Result<Option<OrganizationUnit>> {
        self.get_optional(&format!("organization-tree?organizationCode={}", code.trim()))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

fn require_data<T>(url: &str, envelope: DataEnvelope<T>) -> Result<T> {
    envelope
        .data
        .ok_or_else(|| SyncError::upstream(url, "response carries no data").into())
}
