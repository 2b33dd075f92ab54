use log::{debug, info};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use url::Url;

use super::{Document, DocumentMetadata};
use crate::error::{ConfigError, FetchError, ServiceError};
use crate::providers::utils::RetryPolicy;

/// Keeps only elements carrying one of the configured CSS classes.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    classes: Vec<String>,
    content: Selector,
    title: Selector,
    description: Selector,
    html: Selector,
}

fn parse_selector(raw: &str) -> Result<Selector, ConfigError> {
    Selector::parse(raw).map_err(|e| ConfigError::ContentFilter(format!("{}: {:?}", raw, e)))
}

impl ContentFilter {
    pub fn from_classes(classes: &[String]) -> Result<Self, ConfigError> {
        if classes.is_empty() {
            return Err(ConfigError::ContentFilter(
                "at least one content class is required".to_string(),
            ));
        }
        let selector = classes
            .iter()
            .map(|c| format!(".{}", c))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Self {
            classes: classes.to_vec(),
            content: parse_selector(&selector)?,
            title: parse_selector("title")?,
            description: parse_selector(r#"meta[name="description"]"#)?,
            html: parse_selector("html")?,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    fn matches(&self, element: &ElementRef<'_>) -> bool {
        self.content.matches(element)
    }
}

/// Extracts the filtered text and page metadata from raw HTML.
///
/// Matches nested inside another match are not repeated; each top-level
/// match contributes its text once, in document order.
pub fn extract_document(html: &str, source: &str, filter: &ContentFilter) -> Document {
    let page = Html::parse_document(html);

    let sections: Vec<String> = page
        .select(&filter.content)
        .filter(|element| {
            !element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|ancestor| filter.matches(&ancestor))
        })
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();

    let title = page
        .select(&filter.title)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());
    let description = page
        .select(&filter.description)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|d| d.trim().to_string());
    let language = page
        .select(&filter.html)
        .next()
        .and_then(|h| h.value().attr("lang"))
        .map(str::to_string);

    Document {
        page_content: sections.join("\n\n"),
        metadata: DocumentMetadata {
            source: source.to_string(),
            title,
            description,
            language,
        },
    }
}

pub struct WebLoader {
    client: Client,
    filter: ContentFilter,
    retry: RetryPolicy,
}

impl WebLoader {
    pub fn new(filter: ContentFilter, timeout: Duration, retry: RetryPolicy) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rag-agent-api/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, filter, retry })
    }

    /// Fetches every location in order. The first unreachable location
    /// aborts the whole load.
    pub async fn load(&self, urls: &[Url]) -> Result<Vec<Document>, FetchError> {
        let mut documents = Vec::with_capacity(urls.len());
        for url in urls {
            documents.push(self.fetch(url).await?);
        }
        Ok(documents)
    }

    pub async fn fetch(&self, url: &Url) -> Result<Document, FetchError> {
        info!("Fetching document from {}", url);
        let client = &self.client;
        let body = self
            .retry
            .run(&format!("fetch {}", url), move || async move {
                let response = client.get(url.clone()).send().await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ServiceError::from_status(status, body));
                }
                Ok(response.text().await?)
            })
            .await
            .map_err(|source| FetchError::Unreachable {
                url: url.to_string(),
                source,
            })?;

        debug!("Fetched {} bytes from {}", body.len(), url);
        let document = extract_document(&body, url.as_str(), &self.filter);
        if document.page_content.trim().is_empty() {
            return Err(FetchError::EmptyDocument(url.to_string()));
        }
        info!(
            "Extracted {} characters from {} (title: {})",
            document.page_content.chars().count(),
            url,
            document.metadata.title.as_deref().unwrap_or("untitled")
        );
        Ok(document)
    }
}
