use std::path::PathBuf;
use std::time::Duration;

use crate::classify::KeepPolicy;
use crate::{Error, Result, DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE, DEFAULT_WORKERS};

/// Object storage settings. Required outside dry-run mode.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    pub bucket: Option<String>,
    /// S3-compatible endpoint (MinIO...). `None` means AWS.
    pub endpoint: Option<String>,
}

/// Settings of one crawl run.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub search_url: String,
    pub csv_file: PathBuf,
    /// Maximum number of documents fetched and stored at once.
    pub workers: usize,
    /// Pause after every document, whatever its outcome.
    pub request_delay: Duration,
    pub page_size: usize,
    /// Upper bound on the number of listing pages, `None` for no bound.
    pub max_pages: Option<usize>,
    pub dry_run: bool,
    pub keep_policy: KeepPolicy,
    pub page_timeout: Duration,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    /// Where the markup of page 1 is dumped, if set.
    pub debug_html_dir: Option<PathBuf>,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            search_url: format!("{DEFAULT_BASE_URL}/index.php?lvl=search_segment&id=121"),
            csv_file: PathBuf::from("data/arretes.csv"),
            workers: DEFAULT_WORKERS,
            request_delay: Duration::from_secs(2),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: None,
            dry_run: false,
            keep_policy: KeepPolicy::All,
            page_timeout: Duration::from_secs(90),
            fetch_timeout: Duration::from_secs(60),
            store_timeout: Duration::from_secs(60),
            debug_html_dir: None,
            storage: StorageConfig {
                region: "us-east-1".to_string(),
                ..StorageConfig::default()
            },
        }
    }
}

impl Config {
    /// Checks everything that must hold before the run touches the network.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if !self.dry_run {
            let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
            if missing(&self.storage.access_key_id) {
                errors.push("AWS_ACCESS_KEY_ID missing".to_string());
            }
            if missing(&self.storage.secret_access_key) {
                errors.push("AWS_SECRET_ACCESS_KEY missing".to_string());
            }
            if missing(&self.storage.bucket) {
                errors.push("S3_BUCKET_NAME missing".to_string());
            }
        }
        if self.workers == 0 {
            errors.push("concurrency must be at least 1".to_string());
        }
        if self.page_size == 0 {
            errors.push("page size must be at least 1".to_string());
        }
        if self.max_pages == Some(0) {
            errors.push("page ceiling must be at least 1 when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join(", ")))
        }
    }
}
