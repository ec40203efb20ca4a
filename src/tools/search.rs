//! Google Programmable Search tool

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::Tool;
use crate::llm::ToolSpec;
use crate::{Error, Result};

/// Google Custom Search settings
#[derive(Debug, Clone)]
pub struct GoogleSearchConfig {
    pub api_key: SecretString,
    /// Programmable Search Engine id (`cx`)
    pub engine_id: String,
    pub base_url: String,
    /// Results per query, the API caps this at 10
    pub num: u8,
    /// Interface language hint (`hl`)
    pub lang: String,
}

/// Search result returned to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct CustomSearchResponse {
    #[serde(default)]
    items: Vec<CustomSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CustomSearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

/// Web search through the Google Custom Search JSON API
pub struct GoogleSearchTool {
    config: GoogleSearchConfig,
    client: reqwest::Client,
}

impl GoogleSearchTool {
    #[must_use]
    pub fn new(config: GoogleSearchConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Perform a web search
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response cannot be parsed
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let num = self.config.num.clamp(1, 10).to_string();
        let response = self
            .client
            .get(format!(
                "{}/customsearch/v1",
                self.config.base_url.trim_end_matches('/')
            ))
            .query(&[
                ("key", self.config.api_key.expose_secret()),
                ("cx", self.config.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
                ("hl", self.config.lang.as_str()),
            ])
            .send()
            .await?;

        let response = response.error_for_status().map_err(Error::Http)?;
        let body: CustomSearchResponse = response.json().await?;

        Ok(into_results(body))
    }
}

fn into_results(body: CustomSearchResponse) -> Vec<SearchResult> {
    body.items
        .into_iter()
        .map(|item| SearchResult {
            title: item.title,
            url: item.link,
            snippet: item.snippet,
        })
        .collect()
}

#[async_trait]
impl Tool for GoogleSearchTool {
    fn name(&self) -> &'static str {
        "google_search"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Search the web for current information".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::Tool(format!("invalid google_search arguments: {e}")))?;
        let results = self.search(&args.query).await?;
        tracing::debug!(query = %args.query, results = results.len(), "search finished");
        Ok(serde_json::to_value(results)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> GoogleSearchTool {
        GoogleSearchTool::new(GoogleSearchConfig {
            api_key: SecretString::from("test-key"),
            engine_id: "engine".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            num: 5,
            lang: "vi".to_string(),
        })
    }

    #[test]
    fn parses_custom_search_items() {
        let body: CustomSearchResponse = serde_json::from_str(
            r#"{"kind":"customsearch#search","items":[{"title":"Hanoi","link":"https://example.com","snippet":"Capital"}]}"#,
        )
        .unwrap();
        assert_eq!(
            into_results(body),
            vec![SearchResult {
                title: "Hanoi".to_string(),
                url: "https://example.com".to_string(),
                snippet: "Capital".to_string(),
            }]
        );
    }

    #[test]
    fn missing_items_means_no_results() {
        let body: CustomSearchResponse = serde_json::from_str(r#"{"kind":"customsearch#search"}"#).unwrap();
        assert!(into_results(body).is_empty());
    }

    #[tokio::test]
    async fn rejects_arguments_without_query() {
        let err = tool().call(serde_json::json!({"q": "x"})).await.unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[test]
    fn spec_requires_query() {
        let spec = tool().spec();
        assert_eq!(spec.name, "google_search");
        assert_eq!(spec.parameters["required"][0], "query");
    }
}
