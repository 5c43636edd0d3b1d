use std::sync::Arc;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::record::{Record, RecordKey};
use crate::{Error, Result};

/// Turns one rendered listing page into candidate records.
///
/// Implementations are tied to one version of the site markup and must be pure
/// functions of the page.
pub trait Extractor: Send + Sync {
    /// Every record on the page that has both a key and a document id.
    fn extract(&self, html: &str) -> Vec<Record>;

    /// Total number of results advertised by the page, if it shows one.
    fn total_results(&self, html: &str) -> Option<usize>;
}

/// Runs the extractor off the async runtime.
/// Returns the candidates of the page and the advertised result count.
pub(crate) async fn parse_page(
    extractor: Arc<dyn Extractor>,
    html: Arc<String>,
) -> Result<(Vec<Record>, Option<usize>)> {
    let parsed = spawn_blocking(move || {
        let records = extractor.extract(&html);
        let total = extractor.total_results(&html);
        (records, total)
    })
    .await?;
    Ok(parsed)
}

const HEADING_MARKER: &str = "Arrêté n°";
const CONTAINER_CLASSES: [&str; 2] = ["descr_notice_corps", "notice_corps"];

struct Selectors {
    heading: Selector,
    link: Selector,
    author: Selector,
    row: Selector,
    label: Selector,
    content: Selector,
    navbar: Selector,
}

/// Text patterns of the listing.
struct Patterns {
    /// Order number inside a title, e.g. `Arrêté n° 2025 T 17858 modifiant ...`.
    key: Regex,
    /// Document id inside an `onclick` handler: `sendToVisionneuse,44443` or `sendToVisionneuse(44443)`.
    document_id: Regex,
    /// Result counter of the navbar, `1 - 50 / 1234`.
    navbar: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            key: create_regex(r"n°\s*(\d{4}\s+[A-Z]\s+\d+)")?,
            document_id: create_regex(r"sendToVisionneuse\s*[,(]\s*(\d+)")?,
            navbar: create_regex(r"(\d+)\s*/\s*(\d+)")?,
        })
    }
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            heading: create_selector("h3")?,
            link: create_selector("a[onclick]")?,
            author: create_selector("span.auteur_notCourte")?,
            row: create_selector("table.descr_notice tr.record_p_perso")?,
            label: create_selector("td.labelNot")?,
            content: create_selector("td.labelContent")?,
            navbar: create_selector("div.navbar")?,
        })
    }
}

/// Extractor for the notice listing: one `<h3>` per notice, metadata in the
/// enclosing notice container.
pub struct NoticeExtractor {
    selectors: Selectors,
    patterns: Patterns,
}

impl NoticeExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            selectors: Selectors::new()?,
            patterns: Patterns::new()?,
        })
    }

    fn parse_heading(&self, heading: ElementRef<'_>) -> Option<Record> {
        let title = element_text(heading);
        let Some(key) = self.find_key(&title) else {
            warn!(title = %truncate(&title, 100), "couldn't find a record key in the title");
            return None;
        };

        let container = heading.ancestors().filter_map(ElementRef::wrap).find(|el| {
            el.value().name() == "div"
                && el.value().classes().any(|c| CONTAINER_CLASSES.contains(&c))
        });

        let document_id = self
            .find_document_id(heading)
            .or_else(|| container.and_then(|c| self.find_document_id(c)));
        let Some(document_id) = document_id else {
            warn!(%key, "no document id found, dropping record");
            return None;
        };

        let mut record = Record::new(key, title, document_id);
        if let Some(container) = container {
            self.fill_metadata(&mut record, container);
        }
        debug!(key = %record.key, document_id = %record.document_id, "extracted record");
        Some(record)
    }

    /// Key of the notice, with whitespace between its parts normalised to one space.
    fn find_key(&self, title: &str) -> Option<RecordKey> {
        let raw = self.patterns.key.captures(title)?.get(1)?.as_str();
        Some(RecordKey::new(raw.split_whitespace().collect::<Vec<_>>().join(" ")))
    }

    fn find_document_id(&self, scope: ElementRef<'_>) -> Option<String> {
        scope
            .select(&self.selectors.link)
            .filter_map(|link| link.value().attr("onclick"))
            .find_map(|onclick| self.patterns.document_id.captures(onclick))
            .and_then(|caps| caps.get(1))
            .map(|id| id.as_str().to_string())
    }

    fn fill_metadata(&self, record: &mut Record, container: ElementRef<'_>) {
        let mut authors = container.select(&self.selectors.author).map(element_text);
        record.authority = authors.next().unwrap_or_default();
        record.signer = authors.next().unwrap_or_default();

        for row in container.select(&self.selectors.row) {
            let (Some(label), Some(content)) = (
                row.select(&self.selectors.label).next(),
                row.select(&self.selectors.content).next(),
            ) else {
                continue;
            };
            let label = element_text(label);
            let content = element_text(content);

            if label.contains("Date de publication") {
                record.publication_date = content;
            } else if label.contains("Date de la signature") || label.contains("Date de signature")
            {
                record.signature_date = content;
            } else if label.contains("Poids") {
                record.document_weight_kb = content;
            }
        }
    }
}

impl Extractor for NoticeExtractor {
    fn extract(&self, html: &str) -> Vec<Record> {
        let doc = Html::parse_document(html);
        doc.select(&self.selectors.heading)
            .filter(|h| h.text().collect::<String>().contains(HEADING_MARKER))
            .filter_map(|h| self.parse_heading(h))
            .collect()
    }

    fn total_results(&self, html: &str) -> Option<usize> {
        let doc = Html::parse_document(html);
        let navbar = element_text(doc.select(&self.selectors.navbar).next()?);
        self.patterns.navbar.captures(&navbar)?.get(2)?.as_str().parse().ok()
    }
}

#[inline]
fn create_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidPattern(format!("{pattern}: {e}")))
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

/// Text of an element with each text node trimmed, joined by single spaces and
/// non-breaking spaces replaced.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(|t| t.replace('\u{a0}', " "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
