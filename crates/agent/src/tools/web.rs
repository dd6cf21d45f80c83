//! Web tools: web_search and web_fetch

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Tool, ToolError, ToolOutput};
use crate::context::ExecutionContext;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

/// Web search through the Brave Search API
pub struct WebSearchTool {
    api_key: String,
    max_results: u32,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, max_results: u32) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
            .unwrap_or_default();
        Self {
            api_key,
            max_results,
            endpoint: BRAVE_ENDPOINT.to_string(),
        }
    }

    pub fn from_config(config: &kestrel_config::Config) -> Self {
        Self::new(config.brave_api_key(), config.tools.web.search.max_results)
    }

    /// Point at a different search endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Deserialize)]
struct WebSearchArgs {
    query: String,
    count: Option<u32>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }
    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs and snippets."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "count": { "type": "integer", "description": "Number of results (1-10)", "minimum": 1, "maximum": 10 }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        if self.api_key.is_empty() {
            return Ok(ToolOutput::failure(
                "web search is not configured (set tools.web.search.api_key or BRAVE_API_KEY)",
            ));
        }
        let args: WebSearchArgs = serde_json::from_value(args)?;
        let count = args.count.unwrap_or(self.max_results).clamp(1, 10);
        debug!("web_search: {}", args.query);

        let client = reqwest::Client::new();
        let response = client
            .get(&self.endpoint)
            .query(&[("q", &args.query), ("count", &count.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolOutput::failure(format!(
                "search API returned {}",
                status
            )));
        }

        let data: serde_json::Value = response.json().await?;
        Ok(ToolOutput::text(format_results(&args.query, &data, count)))
    }
}

fn format_results(query: &str, data: &serde_json::Value, count: u32) -> String {
    let results = data["web"]["results"].as_array().filter(|r| !r.is_empty());
    let Some(results) = results else {
        return format!("No results for: {}", query);
    };

    let mut lines = vec![format!("Results for: {}", query)];
    for (i, item) in results.iter().take(count as usize).enumerate() {
        let title = item["title"].as_str().unwrap_or("");
        let url = item["url"].as_str().unwrap_or("");
        let desc = item["description"].as_str().unwrap_or("");
        lines.push(format!("{}. {}", i + 1, title));
        lines.push(format!("   {}", url));
        if !desc.is_empty() {
            lines.push(format!("   {}", strip_tags(desc)));
        }
    }
    lines.join("\n")
}

/// Fetches a URL and reduces it to readable text
pub struct WebFetchTool {
    max_chars: usize,
}

impl WebFetchTool {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new(50_000)
    }
}

#[derive(Deserialize)]
struct WebFetchArgs {
    url: String,
    #[serde(rename = "extractMode")]
    extract_mode: Option<String>,
    #[serde(rename = "maxChars")]
    max_chars: Option<usize>,
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }
    fn description(&self) -> &str {
        "Fetch a URL and extract its readable content."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "http(s) URL to fetch" },
                "extractMode": { "type": "string", "enum": ["markdown", "text"], "default": "markdown" },
                "maxChars": { "type": "integer", "minimum": 100 }
            },
            "required": ["url"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: WebFetchArgs = serde_json::from_value(args)?;
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            return Ok(ToolOutput::failure(format!(
                "unsupported URL (http/https only): {}",
                args.url
            )));
        }
        let max_chars = args.max_chars.unwrap_or(self.max_chars).max(100);
        let extract_mode = args.extract_mode.as_deref().unwrap_or("markdown");
        debug!("web_fetch {} ({})", args.url, extract_mode);

        let client = reqwest::Client::new();
        let response = client
            .get(&args.url)
            .header("User-Agent", USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await?;

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        let (title, content, extractor) = if content_type.contains("application/json") {
            (None, body, "json")
        } else if content_type.contains("text/html") || body.trim_start().starts_with('<') {
            let title = page_title(&body);
            if extract_mode == "text" {
                (title, strip_tags(&body), "text")
            } else {
                (title, html_to_markdown(&body), "markdown")
            }
        } else {
            (None, body, "raw")
        };

        let truncated = content.chars().count() > max_chars;
        let content: String = if truncated {
            content.chars().take(max_chars).collect()
        } else {
            content
        };

        Ok(ToolOutput::structured(json!({
            "url": args.url,
            "finalUrl": final_url,
            "status": status.as_u16(),
            "title": title,
            "extractor": extractor,
            "truncated": truncated,
            "length": content.len(),
            "text": content
        })))
    }
}

fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!title.is_empty()).then_some(title)
}

fn strip_noise(html: &str) -> String {
    let re = Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>")
        .expect("valid regex");
    re.replace_all(html, "").into_owned()
}

fn strip_tags(html: &str) -> String {
    let text = strip_noise(html);
    let text = Regex::new(r"<[^>]+>")
        .expect("valid regex")
        .replace_all(&text, " ");
    let text = decode_html_entities(&text);
    Regex::new(r"[ \t]+")
        .expect("valid regex")
        .replace_all(text.trim(), " ")
        .into_owned()
}

fn html_to_markdown(html: &str) -> String {
    let cleaned = strip_noise(html);
    let text = html2text::from_read(cleaned.as_bytes(), 100);
    Regex::new(r"\n{3,}")
        .expect("valid regex")
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

fn decode_html_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
