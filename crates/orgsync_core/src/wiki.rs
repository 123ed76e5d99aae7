use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{Credentials, SyncConfig};
use crate::http::{RetryPolicy, env_value_u64, env_value_usize, send_with_retry};

pub const NS_MAIN: i32 = 0;
pub const NS_CATEGORY: i32 = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    pub title: String,
    pub namespace: i32,
    pub exists: bool,
    pub text: String,
}

impl WikiPage {
    pub fn missing(title: &str, namespace: i32) -> Self {
        Self {
            title: title.to_string(),
            namespace,
            exists: false,
            text: String::new(),
        }
    }

    /// Categories are the only pages that expose members.
    pub fn is_category(&self) -> bool {
        self.namespace == NS_CATEGORY
    }
}

/// Page-level view of the wiki, addressed by full title.
pub trait WikiStore {
    fn page(&mut self, title: &str) -> Result<WikiPage>;
    /// Member titles (pages and subcategories) of `category`, with or without the `Category:` prefix.
    fn category_members(&mut self, category: &str) -> Result<Vec<String>>;
    fn all_pages(&mut self, namespace: i32) -> Result<Vec<String>>;
    fn edit_page(&mut self, title: &str, text: &str, summary: &str) -> Result<()>;
    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

pub fn category_title(category: &str) -> String {
    if category.starts_with("Category:") {
        category.to_string()
    } else {
        format!("Category:{category}")
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let api_url = config.require_wiki_api_url()?;
        Ok(Self {
            api_url,
            user_agent: config.wiki_user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", credentials.username.clone()),
                ("lgpassword", credentials.password.clone()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                debug!(user = %credentials.username, "logged in to wiki");
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let request = self.client.get(base_url).query(&request_pairs(params));
        self.request_json(request, false)
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let request = self
            .client
            .post(&self.config.api_url)
            .form(&request_pairs(params));
        self.request_json(request, is_write)
    }

    fn request_json(&mut self, request: RequestBuilder, is_write: bool) -> Result<Value> {
        let policy = if is_write {
            RetryPolicy::new(self.config.max_write_retries, self.config.retry_delay_ms)
                .with_multiplier(2)
        } else {
            RetryPolicy::new(self.config.max_retries, self.config.retry_delay_ms)
        };
        let request = request.header("User-Agent", self.config.user_agent.clone());
        let response = send_with_retry(request, &policy, "MediaWiki API", |_| {
            self.apply_rate_limit(is_write)
        })?;

        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }
        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
        check_api_error(payload)
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiStore for MediaWikiClient {
    fn page(&mut self, title: &str) -> Result<WikiPage> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode page response for {title}"))?;
        let Some(page) = parsed.query.pages.into_iter().next() else {
            bail!("page query returned no result for {title}");
        };
        if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
            return Ok(WikiPage::missing(&page.title, page.ns));
        }
        let text = page
            .revisions
            .into_iter()
            .next()
            .and_then(|revision| revision.slots)
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .unwrap_or_default();
        Ok(WikiPage {
            title: page.title,
            namespace: page.ns,
            exists: true,
            text,
        })
    }

    fn category_members(&mut self, category: &str) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;
        let category_title = category_title(category);

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", category_title.clone()),
                ("cmtype", "page|subcat".to_string()),
                ("cmlimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("cmcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode categorymembers API response")?;
            titles.extend(parsed.query.categorymembers.into_iter().map(|item| item.title));

            continue_token = parsed.continuation.and_then(|cont| cont.cmcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("aplimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("apcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode allpages API response")?;
            titles.extend(parsed.query.allpages.into_iter().map(|item| item.title));

            continue_token = parsed.continuation.and_then(|cont| cont.apcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn edit_page(&mut self, title: &str, text: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", text.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
            true,
        )?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "delete".to_string()),
                ("title", title.to_string()),
                ("reason", reason.to_string()),
                ("token", token),
            ],
            true,
        );

        match response {
            Ok(_) => Ok(()),
            Err(error) => {
                if error.to_string().contains("missingtitle") {
                    return Ok(());
                }
                Err(error)
            }
        }
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
    #[serde(default)]
    categorymembers: Vec<TitleQueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    apcontinue: Option<String>,
    cmcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    #[serde(default)]
    ns: i32,
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{QueryResponse, category_title, check_api_error, request_pairs};

    #[test]
    fn category_title_adds_prefix_once() {
        assert_eq!(category_title("Φορείς"), "Category:Φορείς");
        assert_eq!(category_title("Category:Φορείς"), "Category:Φορείς");
    }

    #[test]
    fn request_pairs_skip_empty_values() {
        let pairs = request_pairs(&[("action", "query".to_string()), ("cmcontinue", String::new())]);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], ("format".to_string(), "json".to_string()));
        assert!(pairs.iter().all(|(key, _)| key != "cmcontinue"));
    }

    #[test]
    fn api_error_payload_is_reported() {
        let error = check_api_error(serde_json::json!({
            "error": {"code": "permissiondenied", "info": "no rights"}
        }))
        .expect_err("must fail");
        assert!(error.to_string().contains("[permissiondenied]"));
    }

    #[test]
    fn page_query_decodes_missing_and_present_pages() {
        let parsed: QueryResponse = serde_json::from_value(serde_json::json!({
            "query": {"pages": [
                {"ns": 14, "title": "Category:Χ", "missing": true},
                {"ns": 9000, "title": "Φορέας:Χ", "revisions": [{"slots": {"main": {"content": "body"}}}]}
            ]},
            "continue": {"cmcontinue": "next"}
        }))
        .expect("decode");
        assert_eq!(parsed.query.pages.len(), 2);
        assert_eq!(parsed.query.pages[0].missing, Some(true));
        assert_eq!(
            parsed.continuation.and_then(|cont| cont.cmcontinue).as_deref(),
            Some("next")
        );
    }
}
