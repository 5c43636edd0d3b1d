use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrete_scrap::{
    blob::{BlobStore, DryRunBlobStore},
    classify::KeepPolicy,
    info_time,
    parse::NoticeExtractor,
    request::HttpFetcher,
    s3::{S3BlobStore, S3Credentials},
    store::CsvRecordStore,
    Collaborators, Config, Error, Pipeline, Result, StorageConfig, DEFAULT_BASE_URL,
    DEFAULT_PAGE_SIZE, DEFAULT_WORKERS,
};
use chrono::Local;
use clap::{builder::BoolishValueParser, ArgAction, Parser};
use tracing::info;

/// Scrapes new traffic and parking orders from the municipal bulletin.
#[derive(Parser, Debug)]
#[command(name = "arrete_scrap", version, about, long_about = None)]
struct Cli {
    /// Site root, used for session warm-up and document links.
    #[arg(long, env = "BOVP_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Listing URL, without paging parameters.
    #[arg(long, env = "BOVP_SEARCH_URL")]
    search_url: Option<String>,

    /// CSV record store.
    #[arg(long, env = "CSV_FILE", default_value = "data/arretes.csv")]
    csv_file: PathBuf,

    /// Pause after each document, in seconds.
    #[arg(long, env = "SCRAPE_DELAY_SECONDS", default_value_t = 2.0)]
    delay_secs: f64,

    /// Documents processed at once.
    #[arg(long, env = "MAX_CONCURRENT_PAGES", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Page ceiling, 0 for none.
    #[arg(long, env = "MAX_PAGES_TO_SCRAPE", default_value_t = 0)]
    max_pages: usize,

    #[arg(long, env = "RESULTS_PER_PAGE", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Simulate document storage. No credentials needed.
    #[arg(long, env = "DRY_RUN", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    dry_run: bool,

    /// Which orders to keep: all, circulation or stationnement.
    #[arg(long, env = "FILTER_TYPE", default_value = "all")]
    filter: KeepPolicy,

    /// Listing page budget, in milliseconds.
    #[arg(long, env = "PAGE_LOAD_TIMEOUT", default_value_t = 90_000)]
    page_timeout_ms: u64,

    /// Document download budget, in milliseconds.
    #[arg(long, env = "PDF_DOWNLOAD_TIMEOUT", default_value_t = 60_000)]
    download_timeout_ms: u64,

    /// Object storage budget, in milliseconds.
    #[arg(long, env = "UPLOAD_TIMEOUT", default_value_t = 60_000)]
    upload_timeout_ms: u64,

    /// Directory where the markup of page 1 is saved.
    #[arg(long, env = "DEBUG_HTML_DIR")]
    debug_html_dir: Option<PathBuf>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    aws_region: String,

    #[arg(long, env = "S3_BUCKET_NAME")]
    bucket: Option<String>,

    /// S3-compatible endpoint, AWS when unset.
    #[arg(long, env = "S3_ENDPOINT_URL")]
    endpoint: Option<String>,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let defaults = Config::default();
        Ok(Config {
            search_url: self.search_url.unwrap_or(defaults.search_url),
            base_url: self.base_url,
            csv_file: self.csv_file,
            workers: self.workers,
            request_delay: request_delay(self.delay_secs)?,
            page_size: self.page_size,
            max_pages: (self.max_pages > 0).then_some(self.max_pages),
            dry_run: self.dry_run,
            keep_policy: self.filter,
            page_timeout: Duration::from_millis(self.page_timeout_ms),
            fetch_timeout: Duration::from_millis(self.download_timeout_ms),
            store_timeout: Duration::from_millis(self.upload_timeout_ms),
            debug_html_dir: self.debug_html_dir,
            storage: StorageConfig {
                access_key_id: self.aws_access_key_id,
                secret_access_key: self.aws_secret_access_key,
                region: self.aws_region,
                bucket: self.bucket,
                endpoint: self.endpoint,
            },
        })
    }
}

/// Pause after each document. Negative values mean no pause.
fn request_delay(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_err(|e| Error::Config(format!("invalid SCRAPE_DELAY_SECONDS '{secs}': {e}")))
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match verbose {
        0 => "arrete_scrap=info",
        1 => "arrete_scrap=debug",
        _ => "arrete_scrap=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    fmt().with_env_filter(env_filter).with_target(false).init();
}

fn blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    let storage = &config.storage;
    if config.dry_run {
        return Ok(Arc::new(DryRunBlobStore::new(storage.bucket.as_deref())));
    }

    let required = |v: &Option<String>, name: &str| {
        v.clone()
            .ok_or_else(|| Error::Config(format!("{name} missing")))
    };
    let credentials = S3Credentials {
        access_key_id: required(&storage.access_key_id, "AWS_ACCESS_KEY_ID")?,
        secret_access_key: required(&storage.secret_access_key, "AWS_SECRET_ACCESS_KEY")?,
        region: storage.region.clone(),
    };
    let bucket = required(&storage.bucket, "S3_BUCKET_NAME")?;
    let store = S3BlobStore::new(storage.endpoint.as_deref(), &bucket, credentials)?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Local::now();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.into_config()?;
    config.validate()?;

    let http = Arc::new(HttpFetcher::new(
        &config.base_url,
        &config.search_url,
        config.page_size,
    )?);
    let parts = Collaborators {
        pages: http.clone(),
        extractor: Arc::new(NoticeExtractor::new()?),
        documents: http,
        blobs: blob_store(&config)?,
        store: Arc::new(CsvRecordStore::new(config.csv_file.clone())),
    };

    let summary = Pipeline::new(config, parts)?.run().await?;
    info!(?summary, "run summary");
    info_time!(start_time, "Full program time");

    Ok(())
}
