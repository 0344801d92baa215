//! HTML → markdown extraction.
//!
//! `remove` selectors are detached from the parsed document first, then the
//! `select` selectors pick the significant parts (the whole `<body>` when
//! none are declared) and the result is converted with `htmd`. Markdown and
//! plain text snapshots pass through unchanged.

use archivist_core::{ExtractError, ExtractRequest, Extractor, SourceDocument};
use async_trait::async_trait;
use scraper::{Html, Selector};

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector)
        .map_err(|e| ExtractError::Other(format!("invalid selector `{selector}`: {e:?}")))
}

fn html_to_markdown(html: &str) -> Result<String, ExtractError> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript"])
        .build();
    converter
        .convert(html)
        .map_err(|e| ExtractError::Other(format!("failed to convert html to markdown: {e}")))
}

/// Apply the document's `remove` and `select` rules and return the HTML to
/// convert.
fn significant_html(html: &str, document: &SourceDocument) -> Result<String, ExtractError> {
    let mut parsed = Html::parse_document(html);

    for selector in &document.remove {
        let selector = parse_selector(selector)?;
        let ids: Vec<_> = parsed.select(&selector).map(|element| element.id()).collect();
        for id in ids {
            if let Some(mut node) = parsed.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    let selectors = if document.select.is_empty() {
        vec![parse_selector("body")?]
    } else {
        document
            .select
            .iter()
            .map(|selector| parse_selector(selector))
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut parts = Vec::new();
    for selector in &selectors {
        parts.extend(parsed.select(selector).map(|element| element.html()));
    }
    if parts.is_empty() {
        return Err(ExtractError::Inaccessible(format!(
            "The provided selectors {:?} have not been found in the document at {}",
            document.select, document.location
        )));
    }
    Ok(parts.join("\n"))
}

pub struct HtmlExtractor;

impl HtmlExtractor {
    fn extract_html(&self, html: &str, document: &SourceDocument) -> Result<String, ExtractError> {
        if !document.filters.is_empty() {
            tracing::debug!(
                location = %document.location,
                filters = ?document.filters,
                "named filters are not available, skipping"
            );
        }
        let significant = significant_html(html, document)?;
        let markdown = html_to_markdown(&significant)?;
        Ok(markdown.trim().to_string())
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    async fn extract(&self, request: ExtractRequest) -> Result<String, ExtractError> {
        let text = String::from_utf8_lossy(&request.content);
        match request.mime_type.as_str() {
            "text/html" | "application/xhtml+xml" => self.extract_html(&text, &request.document),
            "text/markdown" | "text/plain" => Ok(text.trim().to_string()),
            other => Err(ExtractError::Inaccessible(format!(
                "No extractor available for mime type {other} at {}",
                request.document.location
            ))),
        }
    }
}
