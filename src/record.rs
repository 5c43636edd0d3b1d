use std::fmt;

use chrono::{DateTime, Local};

/// Natural identifier of a notice: a year / letter code / sequence triplet such as `2025 T 17858`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(String);

impl RecordKey {
    /// Wraps a key found in a title or read back from the record store.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading part of the key, used to partition stored documents by year.
    pub fn year(&self) -> &str {
        match self.0.split_once(' ') {
            Some((year, _)) => year,
            None => "unknown",
        }
    }

    /// File-name safe form: `2025 T 17858` -> `2025_T_17858`.
    pub fn sanitized(&self) -> String {
        self.0.replace(' ', "_").replace('/', "-")
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Boolean facets derived from the title by [`crate::classify::classify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Facets {
    pub concerns_traffic_flow: bool,
    pub concerns_parking: bool,
    pub is_temporary: bool,
}

/// Outcome of document ingestion. Once set on a record it never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentLocator {
    Stored(String),
    DownloadFailed,
    UploadFailed,
}

impl DocumentLocator {
    pub fn is_error(&self) -> bool {
        !matches!(self, DocumentLocator::Stored(_))
    }
}

impl fmt::Display for DocumentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentLocator::Stored(locator) => f.write_str(locator),
            DocumentLocator::DownloadFailed => f.write_str("ERROR: download failed"),
            DocumentLocator::UploadFailed => f.write_str("ERROR: upload failed"),
        }
    }
}

/// One administrative notice scraped from the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: RecordKey,
    pub title: String,
    pub authority: String,
    pub signer: String,
    pub publication_date: String,
    pub signature_date: String,
    /// Size hint shown in the listing, not the size of the fetched document.
    pub document_weight_kb: String,
    pub facets: Facets,
    pub document_id: String,
    pub document_locator: Option<DocumentLocator>,
    pub ingested_at: DateTime<Local>,
}

impl Record {
    /// Builds a candidate with empty optional metadata and default facets.
    pub fn new(key: RecordKey, title: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            key,
            title: title.into(),
            authority: String::new(),
            signer: String::new(),
            publication_date: String::new(),
            signature_date: String::new(),
            document_weight_kb: String::new(),
            facets: Facets::default(),
            document_id: document_id.into(),
            document_locator: None,
            ingested_at: Local::now(),
        }
    }

    /// Sets the locator unless one is already present.
    pub fn with_locator(mut self, locator: DocumentLocator) -> Self {
        match &self.document_locator {
            Some(existing) => {
                tracing::warn!(key = %self.key, %existing, "locator already set, keeping it");
            }
            None => self.document_locator = Some(locator),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parts() {
        let key = RecordKey::new("2025 T 17858");
        assert_eq!(key.year(), "2025");
        assert_eq!(key.sanitized(), "2025_T_17858");
        assert_eq!(RecordKey::new("2025 T 1/2").sanitized(), "2025_T_1-2");
    }

    #[test]
    fn test_year_without_space() {
        assert_eq!(RecordKey::new("2025T1").year(), "unknown");
    }

    #[test]
    fn test_locator_is_set_once() {
        let key = RecordKey::new("2025 T 1");
        let record = Record::new(key, "t", "1")
            .with_locator(DocumentLocator::DownloadFailed)
            .with_locator(DocumentLocator::Stored("s3://b/k".into()));
        assert_eq!(record.document_locator, Some(DocumentLocator::DownloadFailed));
    }

    #[test]
    fn test_locator_markers() {
        assert_eq!(DocumentLocator::DownloadFailed.to_string(), "ERROR: download failed");
        assert_eq!(DocumentLocator::UploadFailed.to_string(), "ERROR: upload failed");
        assert!(!DocumentLocator::Stored("s3://b/k".into()).is_error());
    }
}
