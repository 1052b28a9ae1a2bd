//! Notion employee database directory.
//!
//! Queries one database for an active row whose `telegram_user_id` matches
//! the sender. The row's `can_chat_bot` checkbox decides access; the other
//! non-system properties become the user's profile.

use async_trait::async_trait;
use concierge_core::directory::{Directory, DirectoryEntry};
use concierge_core::error::DirectoryError;
use concierge_core::message::UserId;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const NOTION_VERSION: &str = "2022-06-28";

/// Properties that drive authorization and are kept out of the profile.
const SYSTEM_FIELDS: &[&str] = &[
    "Name",
    "Role",
    "telegram_handle",
    "telegram_user_id",
    "can_chat_bot",
    "context_lines",
    "active",
];

/// A directory backed by a Notion database.
pub struct NotionDirectory {
    base_url: String,
    token: String,
    database_id: String,
    client: reqwest::Client,
}

impl NotionDirectory {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DirectoryError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            database_id: database_id.into(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Query body filtering on `active` and the numeric Telegram id.
    fn query_body(telegram_id: i64) -> Value {
        serde_json::json!({
            "filter": {
                "and": [
                    { "property": "active", "checkbox": { "equals": true } },
                    { "property": "telegram_user_id", "number": { "equals": telegram_id } }
                ]
            },
            "page_size": 1
        })
    }
}

#[async_trait]
impl Directory for NotionDirectory {
    fn name(&self) -> &str {
        "notion"
    }

    async fn lookup(&self, user_id: &UserId) -> Result<Option<DirectoryEntry>, DirectoryError> {
        // Telegram ids are numeric; anything else cannot match a row.
        let Ok(telegram_id) = user_id.as_str().trim().parse::<i64>() else {
            debug!(user_id = %user_id, "Non-numeric user id, not in directory");
            return Ok(None);
        };

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/databases/{}/query", self.database_id),
            )
            .json(&Self::query_body(telegram_id))
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Notion query failed");
            return Err(DirectoryError::Unavailable(format!(
                "Notion returned {}",
                status.as_u16()
            )));
        }

        let query: QueryResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;

        Ok(query.results.into_iter().next().map(|page| entry_from_properties(&page.properties)))
    }

    async fn health_check(&self) -> Result<bool, DirectoryError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/databases/{}", self.database_id))
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    properties: Map<String, Value>,
}

/// Build a directory entry from a page's properties.
fn entry_from_properties(props: &Map<String, Value>) -> DirectoryEntry {
    let allowed = props
        .get("can_chat_bot")
        .and_then(|p| p.get("checkbox"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let display_name = props
        .get("Name")
        .map(property_text)
        .filter(|s| !s.is_empty());

    let role = props.get("Role").map(property_text).filter(|s| !s.is_empty());

    let context_window = props
        .get("context_lines")
        .and_then(|p| p.get("number"))
        .and_then(Value::as_f64)
        .filter(|n| *n >= 1.0)
        .map(|n| n as usize);

    // Notion keeps property order stable per database; sort anyway so the
    // profile (and therefore the prompt) is reproducible.
    let mut fields: Vec<(&String, &Value)> = props
        .iter()
        .filter(|(name, _)| !SYSTEM_FIELDS.contains(&name.as_str()))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    let profile = fields
        .into_iter()
        .filter_map(|(name, value)| {
            let text = property_text(value);
            (!text.is_empty()).then(|| format!("{name}: {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n");

    DirectoryEntry {
        allowed,
        display_name,
        role,
        profile,
        context_window,
    }
}

/// Flatten one Notion property value into plain text.
fn property_text(prop: &Value) -> String {
    let kind = prop.get("type").and_then(Value::as_str).unwrap_or_default();
    let body = prop.get(kind);

    let plain_texts = |items: Option<&Value>, sep: &str| -> String {
        items
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|item| item.get("plain_text").and_then(Value::as_str))
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(sep)
            })
            .unwrap_or_default()
    };

    match kind {
        "rich_text" | "title" => plain_texts(body, " "),
        "select" | "status" => body
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        "multi_select" => body
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|item| item.get("name").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default(),
        "number" => match body {
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        },
        "checkbox" => body.and_then(Value::as_bool).unwrap_or(false).to_string(),
        "date" => body
            .and_then(|d| d.get("start"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        "email" | "phone_number" | "url" => body
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_properties() -> Map<String, Value> {
        let page = json!({
            "Name": { "type": "title", "title": [{ "plain_text": "Dana" }, { "plain_text": "Reyes" }] },
            "Role": { "type": "select", "select": { "name": "Operations Lead" } },
            "can_chat_bot": { "type": "checkbox", "checkbox": true },
            "context_lines": { "type": "number", "number": 12 },
            "active": { "type": "checkbox", "checkbox": true },
            "telegram_user_id": { "type": "number", "number": 6904183057_i64 },
            "telegram_handle": { "type": "rich_text", "rich_text": [{ "plain_text": "@dana" }] },
            "Personality": { "type": "rich_text", "rich_text": [{ "plain_text": "INTJ," }, { "plain_text": "direct" }] },
            "Strengths": { "type": "multi_select", "multi_select": [{ "name": "Planning" }, { "name": "Hiring" }] },
            "Start Date": { "type": "date", "date": { "start": "2023-04-01", "end": null } },
            "Email": { "type": "email", "email": "dana@example.com" },
            "Notes": { "type": "rich_text", "rich_text": [] },
            "Formula": { "type": "formula", "formula": { "string": "x" } }
        });
        page.as_object().unwrap().clone()
    }

    #[test]
    fn entry_parses_system_fields() {
        let entry = entry_from_properties(&sample_properties());
        assert!(entry.allowed);
        assert_eq!(entry.display_name.as_deref(), Some("Dana Reyes"));
        assert_eq!(entry.role.as_deref(), Some("Operations Lead"));
        assert_eq!(entry.context_window, Some(12));
    }

    #[test]
    fn profile_excludes_system_fields_and_empty_values() {
        let entry = entry_from_properties(&sample_properties());
        assert_eq!(
            entry.profile,
            "Email: dana@example.com\n\
             Personality: INTJ, direct\n\
             Start Date: 2023-04-01\n\
             Strengths: Planning, Hiring"
        );
        assert!(!entry.profile.contains("telegram"));
        assert!(!entry.profile.contains("Notes"));
    }

    #[test]
    fn missing_checkbox_means_denied() {
        let props = json!({ "Name": { "type": "title", "title": [{ "plain_text": "X" }] } });
        let entry = entry_from_properties(props.as_object().unwrap());
        assert!(!entry.allowed);
        assert!(entry.context_window.is_none());
    }

    #[test]
    fn zero_context_lines_is_ignored() {
        let props = json!({ "context_lines": { "type": "number", "number": 0 } });
        let entry = entry_from_properties(props.as_object().unwrap());
        assert!(entry.context_window.is_none());
    }

    #[test]
    fn property_text_variants() {
        assert_eq!(property_text(&json!({ "type": "number", "number": 3.5 })), "3.5");
        assert_eq!(property_text(&json!({ "type": "number", "number": null })), "");
        assert_eq!(property_text(&json!({ "type": "checkbox", "checkbox": false })), "false");
        assert_eq!(property_text(&json!({ "type": "select", "select": null })), "");
        assert_eq!(property_text(&json!({ "type": "url", "url": "https://x.io" })), "https://x.io");
        assert_eq!(property_text(&json!({ "type": "phone_number", "phone_number": null })), "");
    }

    #[test]
    fn query_filters_on_active_and_id() {
        let body = NotionDirectory::query_body(42);
        let filters = body["filter"]["and"].as_array().unwrap();
        assert_eq!(filters[0]["property"], "active");
        assert_eq!(filters[1]["number"]["equals"], 42);
    }

    #[test]
    fn query_response_parses_empty_results() {
        let parsed: QueryResponse = serde_json::from_str(r#"{"object":"list","results":[]}"#).unwrap();
        assert!(parsed.results.is_empty());
    }

    #[tokio::test]
    async fn non_numeric_id_is_not_found_without_network() {
        // Unroutable base URL: a network call would fail, not return Ok(None).
        let dir = NotionDirectory::new("http://127.0.0.1:1", "secret", "db").unwrap();
        assert_eq!(dir.lookup(&UserId::new("not-a-number")).await.unwrap(), None);
    }
}
