use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::blob::{fingerprint, object_key, BlobStore};
use crate::record::{DocumentLocator, Record};
use crate::request::{DocumentFetcher, FetchedDocument};
use crate::{Error, Result};

const ACCEPTED_CONTENT_TYPES: [&str; 2] = ["application/pdf", "application/octet-stream"];
const STORED_CONTENT_TYPE: &str = "application/pdf";

/// Fetches the document of one record and stores it, recording the outcome in
/// `document_locator`. Never fails: every error becomes a terminal marker.
pub struct DocumentIngestor {
    fetcher: Arc<dyn DocumentFetcher>,
    store: Arc<dyn BlobStore>,
    fetch_timeout: Duration,
    store_timeout: Duration,
}

impl DocumentIngestor {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        store: Arc<dyn BlobStore>,
        fetch_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            fetch_timeout,
            store_timeout,
        }
    }

    pub async fn ingest(&self, record: Record) -> Record {
        debug!(key = %record.key, document_id = %record.document_id, "ingesting document");

        let document = match self.download(&record.document_id).await {
            Ok(document) => document,
            Err(e) => {
                warn!(key = %record.key, error = %e, "document download failed");
                return record.with_locator(DocumentLocator::DownloadFailed);
            }
        };

        match self.upload(&record, document).await {
            Ok(locator) => {
                info!(key = %record.key, %locator, "document stored");
                record.with_locator(DocumentLocator::Stored(locator))
            }
            Err(e) => {
                warn!(key = %record.key, error = %e, "document upload failed");
                record.with_locator(DocumentLocator::UploadFailed)
            }
        }
    }

    async fn download(&self, document_id: &str) -> Result<FetchedDocument> {
        let document = with_timeout(self.fetch_timeout, self.fetcher.fetch(document_id)).await?;
        if !is_accepted(&document.content_type) {
            return Err(Error::DocumentFetch {
                document_id: document_id.to_string(),
                reason: format!("unexpected content type '{}'", document.content_type),
            });
        }
        Ok(document)
    }

    async fn upload(&self, record: &Record, document: FetchedDocument) -> Result<String> {
        let fingerprint = fingerprint(&document.bytes);
        let key = object_key(&record.key, &fingerprint);

        // Upload-only credentials may be refused a HEAD, so a failed check falls through to the put.
        match with_timeout(self.store_timeout, self.store.exists(&key)).await {
            Ok(true) => {
                info!(key, "document already stored");
                return Ok(self.store.locator(&key));
            }
            Ok(false) => {}
            Err(e) => warn!(key, error = %e, "couldn't check for an existing object, uploading anyway"),
        }

        let metadata = BTreeMap::from([
            ("record-key".to_string(), record.key.to_string()),
            ("content-hash".to_string(), fingerprint),
        ]);
        with_timeout(
            self.store_timeout,
            self.store
                .put(&key, document.bytes, STORED_CONTENT_TYPE, &metadata),
        )
        .await
    }
}

fn is_accepted(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES
        .iter()
        .any(|accepted| content_type.contains(accepted))
}

/// Runs `fut` under a time budget. Expiry is reported as [`Error::Timeout`].
pub(crate) async fn with_timeout<T>(
    budget: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| Error::Timeout(budget))?
}
