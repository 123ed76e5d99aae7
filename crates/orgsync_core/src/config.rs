use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const DEFAULT_USER_AGENT: &str = "orgsync/0.2";
pub const DEFAULT_REGISTRY_URL: &str = "https://hr.apografi.gov.gr/api";
pub const DEFAULT_NAMESPACE: &str = "Φορέας";
pub const DEFAULT_NAMESPACE_ID: i32 = 9000;
pub const DEFAULT_CATEGORY: &str = "Φορείς";
pub const DEFAULT_CATALOGUE_CATEGORY: &str = "Κατάλογος Φορέων";
pub const DEFAULT_TEMPLATE_NAME: &str = "Φορέας";
pub const DEFAULT_TEMPLATE_PARAM_PREFIX: &str = "gov_org_";
pub const DEFAULT_DELETE_REASON: &str = "Παλιός φορέας (δεν υπάρχει πια στην Απογραφή)";
pub const DEFAULT_EDIT_SUMMARY: &str = "orgsync: registry update";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub hierarchy: HierarchySection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RegistrySection {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub namespace: Option<String>,
    pub namespace_id: Option<i32>,
    pub category: Option<String>,
    pub catalogue_category: Option<String>,
    pub template_name: Option<String>,
    pub template_param_prefix: Option<String>,
    pub delete_reason: Option<String>,
    pub edit_summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HierarchySection {
    #[serde(default)]
    pub mode: HierarchyMode,
}

/// How the organization forest is laid out as categories.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyMode {
    /// Full depth: every organization is categorized under its direct parent.
    #[default]
    Tree,
    /// Legacy parent-to-children table, one generation per entry.
    Flat,
}

impl HierarchyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Flat => "flat",
        }
    }
}

/// Wiki-side names every operation agrees on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    pub namespace: String,
    pub namespace_id: i32,
    pub category: String,
    pub catalogue_category: String,
    pub template_name: String,
    pub template_param_prefix: String,
    pub delete_reason: String,
    pub edit_summary: String,
}

impl Default for SiteLayout {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            namespace_id: DEFAULT_NAMESPACE_ID,
            category: DEFAULT_CATEGORY.to_string(),
            catalogue_category: DEFAULT_CATALOGUE_CATEGORY.to_string(),
            template_name: DEFAULT_TEMPLATE_NAME.to_string(),
            template_param_prefix: DEFAULT_TEMPLATE_PARAM_PREFIX.to_string(),
            delete_reason: DEFAULT_DELETE_REASON.to_string(),
            edit_summary: DEFAULT_EDIT_SUMMARY.to_string(),
        }
    }
}

impl SiteLayout {
    /// `[[Category:Φορείς]]`, carried by every top-level organization category.
    pub fn category_marker(&self) -> String {
        category_marker(&self.category)
    }

    pub fn catalogue_marker(&self) -> String {
        category_marker(&self.catalogue_category)
    }

    pub fn content_title(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }

    pub fn category_title(&self, name: &str) -> String {
        format!("Category:{name}")
    }

    /// Strip the organization namespace prefix, if present.
    pub fn strip_namespace<'a>(&self, title: &'a str) -> &'a str {
        title
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(title)
    }

    /// True only for titles carrying the `Namespace:` prefix.
    pub fn is_content_title(&self, title: &str) -> bool {
        title
            .strip_prefix(self.namespace.as_str())
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

pub fn category_marker(name: &str) -> String {
    format!("[[Category:{name}]]")
}

impl SyncConfig {
    /// Resolve the registry base URL: env ORGSYNC_REGISTRY_URL > config > default.
    pub fn registry_url(&self) -> String {
        env_override("ORGSYNC_REGISTRY_URL")
            .or_else(|| self.registry.base_url.clone())
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string())
    }

    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn wiki_api_url(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn wiki_user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn require_wiki_api_url(&self) -> Result<String, SyncError> {
        self.wiki_api_url().ok_or_else(|| {
            SyncError::Configuration(
                "wiki API URL is not configured (set WIKI_API_URL or [wiki].api_url)".to_string(),
            )
        })
    }

    pub fn site_layout(&self) -> SiteLayout {
        let defaults = SiteLayout::default();
        let wiki = &self.wiki;
        SiteLayout {
            namespace: wiki.namespace.clone().unwrap_or(defaults.namespace),
            namespace_id: wiki.namespace_id.unwrap_or(defaults.namespace_id),
            category: wiki.category.clone().unwrap_or(defaults.category),
            catalogue_category: wiki
                .catalogue_category
                .clone()
                .unwrap_or(defaults.catalogue_category),
            template_name: wiki.template_name.clone().unwrap_or(defaults.template_name),
            template_param_prefix: wiki
                .template_param_prefix
                .clone()
                .unwrap_or(defaults.template_param_prefix),
            delete_reason: wiki.delete_reason.clone().unwrap_or(defaults.delete_reason),
            edit_summary: wiki.edit_summary.clone().unwrap_or(defaults.edit_summary),
        }
    }
}

/// Load and parse a SyncConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SyncConfig> {
    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    username: String,
    password: String,
}

/// Resolve bot credentials: env WIKI_BOT_USER/WIKI_BOT_PASS > YAML credentials file.
pub fn load_credentials(credentials_path: &Path) -> Result<Credentials> {
    load_credentials_with_lookup(credentials_path, |key| env::var(key).ok())
}

fn load_credentials_with_lookup<F>(credentials_path: &Path, lookup_env: F) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let username = lookup_env("WIKI_BOT_USER").filter(|value| !value.trim().is_empty());
    let password = lookup_env("WIKI_BOT_PASS").filter(|value| !value.trim().is_empty());
    if let (Some(username), Some(password)) = (username, password) {
        return Ok(Credentials {
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        });
    }

    if !credentials_path.exists() {
        return Err(SyncError::Configuration(format!(
            "wiki credentials missing: set WIKI_BOT_USER/WIKI_BOT_PASS or create {}",
            credentials_path.display()
        ))
        .into());
    }
    let content = fs::read_to_string(credentials_path)
        .with_context(|| format!("failed to read {}", credentials_path.display()))?;
    let parsed: CredentialsFile = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", credentials_path.display()))?;
    if parsed.username.trim().is_empty() || parsed.password.is_empty() {
        return Err(SyncError::Configuration(format!(
            "credentials file {} has an empty username or password",
            credentials_path.display()
        ))
        .into());
    }
    Ok(Credentials {
        username: parsed.username.trim().to_string(),
        password: parsed.password,
    })
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
