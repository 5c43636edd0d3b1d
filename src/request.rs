use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tracing::{debug, info};

use crate::{Error, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Source of rendered listing pages. Holds the crawling session.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Warms up the session before paging. Callers treat failures as non-fatal.
    async fn establish_session(&self) -> Result<()>;

    /// Markup of listing page `page_num`, counted from 1.
    async fn fetch(&self, page_num: usize) -> Result<String>;

    /// Releases the session. Called once on every exit path of a run.
    async fn close(&self) {}
}

/// A downloaded document together with its declared content type.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, document_id: &str) -> Result<FetchedDocument>;
}

/// Deterministic URL of listing page `page_num`.
pub fn page_url(search_url: &str, page_num: usize, page_size: usize) -> String {
    let sep = if search_url.contains('?') { '&' } else { '?' };
    format!("{search_url}{sep}page={page_num}&nb_per_page={page_size}")
}

/// Plain HTTP transport for both listing pages and documents. Cookies set by the
/// site during session warm-up are reused for every later request.
#[derive(Clone)]
pub struct HttpFetcher {
    // Client uses Arc so we can clone cheaply
    client: Client,
    base_url: String,
    search_url: String,
    page_size: usize,
}

impl HttpFetcher {
    pub fn new(base_url: &str, search_url: &str, page_size: usize) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8",
            ),
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            search_url: search_url.to_string(),
            page_size,
        })
    }

    pub fn document_url(&self, document_id: &str) -> String {
        format!("{}/doc_num_data.php?explnum_id={document_id}", self.base_url)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn establish_session(&self) -> Result<()> {
        let res = self.client.get(&self.base_url).send().await?;
        res.error_for_status()?;
        info!(base_url = %self.base_url, "session established");
        Ok(())
    }

    async fn fetch(&self, page_num: usize) -> Result<String> {
        let url = page_url(&self.search_url, page_num, self.page_size);
        debug!(%url, "requesting listing page");
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| Error::PageFetch {
                page: page_num,
                reason: e.to_string(),
            })?;
        let html = res.text().await?;
        Ok(html)
    }

    async fn close(&self) {
        debug!("http session closed");
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, document_id: &str) -> Result<FetchedDocument> {
        let url = self.document_url(document_id);
        debug!(%url, "requesting document");
        let res = self.client.get(&url).send().await?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::DocumentFetch {
                document_id: document_id.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let content_type = res
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = res.bytes().await?.to_vec();
        Ok(FetchedDocument {
            bytes,
            content_type,
        })
    }
}
