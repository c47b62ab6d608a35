//! Collaborator-backed tools registered by the CLI.
//!
//! `web_search` talks to the Brave Search API and needs a Premium user;
//! `crm_lookup` reads the account records file and is Internal-only.  Its
//! observations are trusted: the engine cites them over model recall.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use concierge_core::query::UserTier;
use concierge_core::{CoreError, Tool};

// ---------------------------------------------------------------------------
// Web search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    title: String,
    url: String,
    description: Option<String>,
}

/// Web search via the Brave Search API. Premium entitlement.
pub struct WebSearchTool {
    api_key: Option<String>,
    http: reqwest::Client,
}

impl WebSearchTool {
    /// Read the API key from `BRAVE_API_KEY`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("BRAVE_API_KEY").ok();
        if api_key.is_none() {
            warn!("BRAVE_API_KEY not set, web_search calls will fail");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("concierge/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { api_key, http }
    }

    async fn search(&self, query: &str, limit: usize) -> concierge_core::Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            CoreError::Internal("BRAVE_API_KEY is not configured".into())
        })?;

        debug!(query = %query, limit, "searching the web");

        let resp = self
            .http
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", &limit.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await
            .map_err(|e| CoreError::Internal(format!("search request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(CoreError::Internal(format!(
                "search API returned {status}"
            )));
        }

        let data: BraveSearchResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Internal(format!("malformed search response: {e}")))?;

        let results = data.web.map(|w| w.results).unwrap_or_default();
        if results.is_empty() {
            return Ok("No results found.".into());
        }

        let lines: Vec<String> = results
            .iter()
            .take(limit)
            .map(|r| {
                format!(
                    "- {} ({}): {}",
                    r.title,
                    r.url,
                    r.description.as_deref().unwrap_or("no description")
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and snippets."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 10,
                    "description": "Maximum number of results (default 5)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn min_user_tier(&self) -> UserTier {
        UserTier::Premium
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    async fn run(&self, arguments: Value) -> concierge_core::Result<Value> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| CoreError::InvalidArguments {
                tool: "web_search".into(),
                reason: "`query` must be a string".into(),
            })?;
        let limit = arguments["limit"].as_u64().unwrap_or(5) as usize;

        let summary = self.search(query, limit).await?;
        Ok(Value::String(summary))
    }
}

// ---------------------------------------------------------------------------
// CRM lookup
// ---------------------------------------------------------------------------

/// Account lookup backed by a JSON records file. Internal entitlement;
/// observations are trusted.
pub struct CrmLookupTool {
    records: HashMap<String, Value>,
}

impl CrmLookupTool {
    /// Load the records file: a JSON object keyed by account id.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let records: HashMap<String, Value> = serde_json::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            accounts = records.len(),
            "CRM records loaded"
        );
        Ok(Self { records })
    }

    #[cfg(test)]
    fn from_records(records: HashMap<String, Value>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for CrmLookupTool {
    fn name(&self) -> &str {
        "crm_lookup"
    }

    fn description(&self) -> &str {
        "Look up a customer account record by account id. Authoritative."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "account_id": {
                    "type": "string",
                    "description": "The account identifier"
                }
            },
            "required": ["account_id"],
            "additionalProperties": false
        })
    }

    fn trusted(&self) -> bool {
        true
    }

    fn min_user_tier(&self) -> UserTier {
        UserTier::Internal
    }

    async fn run(&self, arguments: Value) -> concierge_core::Result<Value> {
        let account_id = arguments["account_id"]
            .as_str()
            .ok_or_else(|| CoreError::InvalidArguments {
                tool: "crm_lookup".into(),
                reason: "`account_id` must be a string".into(),
            })?;

        match self.records.get(account_id) {
            Some(record) => Ok(record.clone()),
            None => Ok(Value::String(format!(
                "No record found for account {account_id}."
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crm_lookup_returns_the_record() {
        let mut records = HashMap::new();
        records.insert(
            "acct-7".to_owned(),
            json!({"status": "active", "plan": "premium"}),
        );
        let tool = CrmLookupTool::from_records(records);

        let out = tool.run(json!({"account_id": "acct-7"})).await.unwrap();
        assert_eq!(out["status"], "active");
    }

    #[tokio::test]
    async fn crm_lookup_misses_politely() {
        let tool = CrmLookupTool::from_records(HashMap::new());
        let out = tool.run(json!({"account_id": "nope"})).await.unwrap();
        assert!(out.as_str().unwrap().contains("No record found"));
    }

    #[test]
    fn entitlements_and_trust() {
        let tool = CrmLookupTool::from_records(HashMap::new());
        assert!(tool.trusted());
        assert_eq!(tool.min_user_tier(), UserTier::Internal);

        let search = WebSearchTool {
            api_key: None,
            http: reqwest::Client::new(),
        };
        assert!(!search.trusted());
        assert_eq!(search.min_user_tier(), UserTier::Premium);
    }
}
