//! Firecrawl client implementation of `BasePageRenderer`.
//!
//! Requests the fullest-fidelity HTML Firecrawl offers (`rawHtml`) together
//! with a full-page screenshot. Any unusable answer is a `RenderError`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::errors::RenderError;
use super::{BasePageRenderer, PageMetadata, RenderedPage};

pub const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev";

/// Accept cached renders up to two days old
const MAX_CACHE_AGE_MS: u64 = 172_800_000;

pub struct FirecrawlClient {
    client: Client,
    api_key: String,
    base_url: String,
}

// Request/Response types for the Firecrawl scrape API

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: Vec<ScrapeFormat>,
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
    #[serde(rename = "maxAge")]
    max_age: u64,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ScrapeFormat {
    Named(&'static str),
    Screenshot {
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(rename = "fullPage")]
        full_page: bool,
    },
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeData {
    html: Option<String>,
    raw_html: Option<String>,
    screenshot: Option<String>,
    #[serde(default)]
    metadata: Option<ScrapeMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeMetadata {
    title: Option<String>,
    description: Option<String>,
    status_code: Option<u16>,
    error: Option<String>,
}

impl From<ScrapeMetadata> for PageMetadata {
    fn from(meta: ScrapeMetadata) -> Self {
        Self {
            title: meta.title,
            description: meta.description,
            status_code: meta.status_code,
            error: meta.error,
        }
    }
}

impl FirecrawlClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, RenderError> {
        Self::with_base_url(api_key, FIRECRAWL_API_URL, timeout)
    }

    /// Point the client at a self-hosted Firecrawl or a test server.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RenderError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn scrape_request(url: &str) -> ScrapeRequest<'_> {
        ScrapeRequest {
            url,
            formats: vec![
                ScrapeFormat::Named("rawHtml"),
                ScrapeFormat::Screenshot {
                    kind: "screenshot",
                    full_page: true,
                },
            ],
            only_main_content: true,
            max_age: MAX_CACHE_AGE_MS,
        }
    }

    /// Turn a decoded response into a page, or the reason it is unusable.
    fn into_page(url: &str, response: ScrapeResponse) -> Result<RenderedPage, RenderError> {
        let metadata_error = response
            .data
            .as_ref()
            .and_then(|d| d.metadata.as_ref())
            .and_then(|m| m.error.clone());

        if !response.success {
            return Err(RenderError::Unsuccessful {
                url: url.to_string(),
                message: metadata_error
                    .or(response.error)
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        let data = response.data.ok_or_else(|| RenderError::EmptyDocument {
            url: url.to_string(),
        })?;

        let page = RenderedPage {
            html: data.html,
            raw_html: data.raw_html,
            screenshot: data.screenshot.filter(|s| !s.is_empty()),
            metadata: data.metadata.map(PageMetadata::from).unwrap_or_default(),
        };

        if page.document().is_none() {
            return Err(RenderError::EmptyDocument {
                url: url.to_string(),
            });
        }

        Ok(page)
    }
}

#[async_trait]
impl BasePageRenderer for FirecrawlClient {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let endpoint = format!("{}/v2/scrape", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&Self::scrape_request(url))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(RenderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decoded: ScrapeResponse = serde_json::from_str(&body).map_err(RenderError::Decode)?;
        let page = Self::into_page(url, decoded)?;

        debug!(
            url = %url,
            title = page.metadata.title.as_deref().unwrap_or(""),
            status_code = page.metadata.status_code,
            has_screenshot = page.screenshot.is_some(),
            "page rendered"
        );

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> ScrapeResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(FirecrawlClient::scrape_request("https://example.com")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "url": "https://example.com",
                "formats": ["rawHtml", {"type": "screenshot", "fullPage": true}],
                "onlyMainContent": true,
                "maxAge": 172800000u64
            })
        );
    }

    #[test]
    fn test_successful_response() {
        let response = decode(
            r#"{
                "success": true,
                "data": {
                    "rawHtml": "<html><body>hi</body></html>",
                    "screenshot": "https://cdn.firecrawl.dev/shot.png",
                    "metadata": {"title": "Example", "description": "An example", "statusCode": 200}
                }
            }"#,
        );

        let page = FirecrawlClient::into_page("https://example.com", response).unwrap();
        assert_eq!(page.document(), Some("<html><body>hi</body></html>"));
        assert_eq!(page.screenshot.as_deref(), Some("https://cdn.firecrawl.dev/shot.png"));
        assert_eq!(page.metadata.title.as_deref(), Some("Example"));
        assert_eq!(page.metadata.status_code, Some(200));
    }

    #[test]
    fn test_unsuccessful_response_is_error() {
        let response = decode(r#"{"success": false}"#);
        let err = FirecrawlClient::into_page("https://example.com", response).unwrap_err();
        assert!(matches!(err, RenderError::Unsuccessful { .. }));
        assert!(err.to_string().contains("Unknown error"));
    }

    #[test]
    fn test_unsuccessful_response_carries_metadata_error() {
        let response = decode(
            r#"{"success": false, "data": {"metadata": {"error": "blocked by robots"}}}"#,
        );
        let err = FirecrawlClient::into_page("https://example.com", response).unwrap_err();
        assert!(err.to_string().contains("blocked by robots"));
    }

    #[test]
    fn test_missing_html_is_error() {
        let response = decode(r#"{"success": true, "data": {"metadata": {"statusCode": 200}}}"#);
        let err = FirecrawlClient::into_page("https://example.com", response).unwrap_err();
        assert!(matches!(err, RenderError::EmptyDocument { .. }));
    }

    #[test]
    fn test_falls_back_to_cleaned_html() {
        let response = decode(r#"{"success": true, "data": {"html": "<p>clean</p>"}}"#);
        let page = FirecrawlClient::into_page("https://example.com", response).unwrap();
        assert_eq!(page.document(), Some("<p>clean</p>"));
    }
}
