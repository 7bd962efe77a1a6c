use crate::config::FetchConfig;
use std::{error::Error, time::Duration};

/// What a page fetch produced, classified for the quality gate.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Extracted page text, whitespace-normalized
    Text(String),
    Failed(FetchFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchFailure {
    /// HTTP 4xx, the page is confirmed gone
    ClientError(u16),
    /// DNS, connection refused, TLS and similar transport failures
    Network(String),
    /// request exceeded the configured deadline
    Timeout,
    /// response body is not textual content
    NotText(String),
    /// 5xx and any other non-success status
    ServerError(u16),
}

pub trait ContentFetcher: Send {
    fn fetch(&self, url: &str) -> FetchOutcome;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client })
    }
}

impl ContentFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> FetchOutcome {
        let parsed = match url::Url::parse(url) {
            Ok(u) => u,
            Err(err) => return FetchOutcome::Failed(FetchFailure::Network(err.to_string())),
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return FetchOutcome::Failed(FetchFailure::Network(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed.host_str().unwrap_or_default();
        log::debug!("{host}: requesting");

        let resp = match self.client.get(url).send() {
            Ok(r) => r,
            Err(err) => return FetchOutcome::Failed(classify_transport(&err)),
        };

        let status = resp.status();
        if !status.is_success() {
            log::debug!("{host}: {}", status);
            if status.is_client_error() {
                return FetchOutcome::Failed(FetchFailure::ClientError(status.as_u16()));
            }
            return FetchOutcome::Failed(FetchFailure::ServerError(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        if !is_textual(&content_type) {
            return FetchOutcome::Failed(FetchFailure::NotText(content_type));
        }

        let body = match resp.text() {
            Ok(b) => b,
            Err(err) => return FetchOutcome::Failed(classify_transport(&err)),
        };

        let text = if content_type.contains("text/plain") {
            normalize_whitespace(&body)
        } else {
            extract_text(&body)
        };

        FetchOutcome::Text(text)
    }
}

fn classify_transport(err: &reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        return FetchFailure::Timeout;
    }
    FetchFailure::Network(root_cause(err))
}

fn root_cause(error: &reqwest::Error) -> String {
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.contains("text/html")
        || ct.contains("text/plain")
        || ct.contains("application/xhtml")
        || ct.contains("application/xml")
        || ct.contains("text/xml")
}

/// Visible text of an HTML document, scripts and styles dropped,
/// whitespace collapsed.
pub fn extract_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let body_selector = scraper::Selector::parse("body").unwrap();

    let mut raw = String::new();
    if let Some(body) = document.select(&body_selector).next() {
        collect_text(*body, &mut raw);
    }
    normalize_whitespace(&raw)
}

fn collect_text(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
    for child in node.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(element) = child.value().as_element() {
            if !matches!(
                element.name(),
                "script" | "style" | "noscript" | "template" | "svg" | "iframe"
            ) {
                collect_text(child, out);
            }
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
