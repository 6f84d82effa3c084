//! Web lookups: DuckDuckGo HTML search and the Wikipedia search API
//!
//! Fetching and parsing are split so the parsers can be tested against
//! fixed documents without network access.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{ParamSpec, Tool, ToolArgs, ToolError};

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";
const WIKIPEDIA_PAGE_URL: &str = "https://en.wikipedia.org/wiki/";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const REQUEST_TIMEOUT_SECS: u64 = 20;
const WIKI_RESULT_LIMIT: u32 = 5;
const NO_SNIPPET: &str = "No snippet available.";

/// One search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn selector(css: &str) -> Result<Selector, ToolError> {
    Selector::parse(css).map_err(|e| ToolError::Failed(format!("bad selector '{}': {}", css, e)))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plain text of an HTML fragment
fn strip_html(fragment: &str) -> String {
    element_text(Html::parse_fragment(fragment).root_element())
}

/// Extract results from a DuckDuckGo HTML results page
///
/// A result needs both a title and a URL; the snippet is optional.
pub fn parse_duckduckgo_results(html: &str) -> Result<Vec<SearchHit>, ToolError> {
    let document = Html::parse_document(html);
    let result_sel = selector(".result")?;
    let title_sel = selector(".result__title")?;
    let snippet_sel = selector(".result__snippet")?;
    let url_sel = selector(".result__url")?;

    let mut hits = Vec::new();
    for result in document.select(&result_sel) {
        let title = result.select(&title_sel).next();
        let link = result.select(&url_sel).next();
        let (Some(title), Some(link)) = (title, link) else {
            continue;
        };

        let url = link
            .value()
            .attr("href")
            .map(str::to_string)
            .unwrap_or_else(|| element_text(link));
        let snippet = result
            .select(&snippet_sel)
            .next()
            .map(element_text)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_SNIPPET.to_string());

        hits.push(SearchHit {
            title: element_text(title),
            url,
            snippet,
        });
    }
    Ok(hits)
}

/// Extract results from a MediaWiki `list=search` response
pub fn parse_wikipedia_results(body: &Value) -> Result<Vec<SearchHit>, ToolError> {
    let entries = body
        .pointer("/query/search")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Failed("Unexpected Wikipedia API response".to_string()))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let title = entry.get("title")?.as_str()?.to_string();
            let snippet = entry
                .get("snippet")
                .and_then(Value::as_str)
                .map(strip_html)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| NO_SNIPPET.to_string());
            let url = format!("{}{}", WIKIPEDIA_PAGE_URL, title.replace(' ', "_"));
            Some(SearchHit {
                title,
                url,
                snippet,
            })
        })
        .collect())
}

const QUERY_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "query",
    "string",
    "What to search for",
)];

// ─── web_search ─────────────────────────────────────────────────────────────

/// Web search through DuckDuckGo's HTML endpoint
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web with DuckDuckGo. Returns titles, URLs and snippets."
    }

    fn parameters(&self) -> &[ParamSpec] {
        QUERY_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = args.require_str("query")?;

        let response = self
            .client
            .get(DUCKDUCKGO_HTML_URL)
            .query(&[("q", query)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "DuckDuckGo returned HTTP {}",
                status.as_u16()
            )));
        }
        let html = response.text().await?;
        let results = parse_duckduckgo_results(&html)?;
        debug!(query, hits = results.len(), "Web search completed");

        Ok(json!({ "query": query, "results": results }))
    }
}

// ─── wiki_search ────────────────────────────────────────────────────────────

/// Article search through the Wikipedia API
pub struct WikiSearchTool {
    client: reqwest::Client,
}

impl WikiSearchTool {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for WikiSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WikiSearchTool {
    fn name(&self) -> &str {
        "wiki_search"
    }

    fn description(&self) -> &str {
        "Search Wikipedia articles. Returns titles, URLs and snippets."
    }

    fn parameters(&self) -> &[ParamSpec] {
        QUERY_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = args.require_str("query")?;
        let limit = WIKI_RESULT_LIMIT.to_string();

        let response = self
            .client
            .get(WIKIPEDIA_API_URL)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("format", "json"),
                ("srlimit", limit.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "Wikipedia returned HTTP {}",
                status.as_u16()
            )));
        }
        let body: Value = response.json().await?;
        let results = parse_wikipedia_results(&body)?;
        debug!(query, hits = results.len(), "Wikipedia search completed");

        Ok(json!({ "query": query, "results": results }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DDG_FIXTURE: &str = r#"
<html><body>
  <div class="result results_links">
    <h2 class="result__title"><a class="result__a" href="//duckduckgo.com/l/?uddg=x">The Rust   Book</a></h2>
    <a class="result__url" href="https://doc.rust-lang.org/book/">doc.rust-lang.org/book</a>
    <a class="result__snippet">Learn <b>Rust</b> from scratch.</a>
  </div>
  <div class="result">
    <h2 class="result__title">No link here</h2>
  </div>
  <div class="result">
    <h2 class="result__title">Tokio</h2>
    <a class="result__url" href="https://tokio.rs">tokio.rs</a>
  </div>
</body></html>
"#;

    #[test]
    fn test_parse_duckduckgo_results() {
        let hits = parse_duckduckgo_results(DDG_FIXTURE).unwrap();
        assert_eq!(hits.len(), 2);

        assert_eq!(hits[0].title, "The Rust Book");
        assert_eq!(hits[0].url, "https://doc.rust-lang.org/book/");
        assert_eq!(hits[0].snippet, "Learn Rust from scratch.");

        assert_eq!(hits[1].title, "Tokio");
        assert_eq!(hits[1].snippet, NO_SNIPPET);
    }

    #[test]
    fn test_parse_duckduckgo_empty_page() {
        assert!(parse_duckduckgo_results("<html></html>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_wikipedia_results() {
        let body = json!({
            "query": {
                "search": [
                    {"title": "Rust (programming language)", "snippet": "<span class=\"searchmatch\">Rust</span> is a language"},
                    {"title": "Ferris", "snippet": ""},
                    {"snippet": "no title"}
                ]
            }
        });
        let hits = parse_wikipedia_results(&body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(
            hits[0].url,
            "https://en.wikipedia.org/wiki/Rust_(programming_language)"
        );
        assert_eq!(hits[0].snippet, "Rust is a language");
        assert_eq!(hits[1].snippet, NO_SNIPPET);
    }

    #[test]
    fn test_parse_wikipedia_bad_shape() {
        assert!(parse_wikipedia_results(&json!({"error": "x"})).is_err());
    }

    #[tokio::test]
    #[ignore] // hits the network
    async fn test_live_wiki_search() {
        use crate::security::Workspace;
        use std::collections::HashMap;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::new(dir.path()).unwrap());
        let mut values = serde_json::Map::new();
        values.insert("query".into(), json!("Rust programming language"));
        let out = WikiSearchTool::new()
            .invoke(ToolArgs::new(values, HashMap::new(), ws))
            .await
            .unwrap();
        assert!(!out["results"].as_array().unwrap().is_empty());
    }
}
