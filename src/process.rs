use std::collections::HashSet;
use std::sync::Arc;

use chrono::Local;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::{mpsc, Semaphore},
    task::{spawn_blocking, JoinSet},
};
use tracing::{debug, error, info, instrument, warn};

use crate::blob::BlobStore;
use crate::classify::classify;
use crate::config::Config;
use crate::ingest::{with_timeout, DocumentIngestor};
use crate::ledger::Ledger;
use crate::parse::{parse_page, Extractor};
use crate::record::{DocumentLocator, Record};
use crate::request::{DocumentFetcher, PageFetcher};
use crate::store::RecordStore;
use crate::{info_time, Error, Result};

/// External collaborators of a run.
pub struct Collaborators {
    pub pages: Arc<dyn PageFetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub documents: Arc<dyn DocumentFetcher>,
    pub blobs: Arc<dyn BlobStore>,
    pub store: Arc<dyn RecordStore>,
}

/// Why paging ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The last page (advertised or configured) was processed.
    LastPage,
    /// A page contributed no new record. Listings are sorted newest first, so
    /// later pages can only hold records that are already stored.
    NoNewRecords,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_fetched: usize,
    pub records_persisted: usize,
    pub download_failures: usize,
    pub upload_failures: usize,
    pub stop_reason: Option<StopReason>,
}

/// States of a run. An error returned from any state aborts the run.
#[derive(Debug)]
pub enum RunState {
    Init,
    Paging { page: usize },
    Processing { page: usize, candidates: Vec<Record> },
    Persisting { page: usize, completed: Vec<Record> },
    Done(StopReason),
}

impl RunState {
    fn name(&self) -> &'static str {
        match self {
            RunState::Init => "init",
            RunState::Paging { .. } => "paging",
            RunState::Processing { .. } => "processing",
            RunState::Persisting { .. } => "persisting",
            RunState::Done(_) => "done",
        }
    }
}

/// Context of one crawl run: configuration, ledger and collaborator handles.
///
/// The ledger and the pending batch are only touched between suspension points
/// of the run itself; document workers hand their results back over a channel.
pub struct Pipeline {
    config: Config,
    ledger: Ledger,
    pages: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    ingestor: Arc<DocumentIngestor>,
    store: Arc<dyn RecordStore>,
    last_page: Option<usize>,
    summary: RunSummary,
}

impl Pipeline {
    /// Validates the configuration and loads the ledger from the record store.
    pub fn new(config: Config, parts: Collaborators) -> Result<Self> {
        config.validate()?;
        let ledger = Ledger::load(parts.store.as_ref());
        let ingestor = DocumentIngestor::new(
            parts.documents,
            parts.blobs,
            config.fetch_timeout,
            config.store_timeout,
        );

        Ok(Self {
            config,
            ledger,
            pages: parts.pages,
            extractor: parts.extractor,
            ingestor: Arc::new(ingestor),
            store: parts.store,
            last_page: None,
            summary: RunSummary::default(),
        })
    }

    /// Drives the run to completion. The page session is closed on every exit path.
    pub async fn run(mut self) -> Result<RunSummary> {
        let start_time = Local::now();
        info!(
            workers = self.config.workers,
            page_size = self.config.page_size,
            max_pages = ?self.config.max_pages,
            keep_policy = ?self.config.keep_policy,
            dry_run = self.config.dry_run,
            known_records = self.ledger.len(),
            "Started scraping"
        );

        let result = self.drive().await;
        self.pages.close().await;

        match &result {
            Ok(summary) => info_time!(
                start_time,
                pages = summary.pages_fetched,
                persisted = summary.records_persisted,
                download_failures = summary.download_failures,
                upload_failures = summary.upload_failures,
                stop_reason = ?summary.stop_reason,
                "Finished scraping"
            ),
            Err(e) => error!(
                error = %e,
                pages = self.summary.pages_fetched,
                persisted = self.summary.records_persisted,
                "Run aborted"
            ),
        }
        result
    }

    async fn drive(&mut self) -> Result<RunSummary> {
        let mut state = RunState::Init;
        loop {
            debug!(state = state.name(), "entering state");
            state = match state {
                RunState::Init => {
                    self.establish_session().await;
                    RunState::Paging { page: 1 }
                }
                RunState::Paging { page } => self.fetch_page(page).await?,
                RunState::Processing { page, candidates } => {
                    let start_page_time = Local::now();
                    let count = candidates.len();
                    let completed = self.process_page(candidates).await?;
                    info_time!(start_page_time, page, records = count, "Processed page");
                    RunState::Persisting { page, completed }
                }
                RunState::Persisting { page, completed } => {
                    self.persist(completed).await?;
                    RunState::Paging { page: page + 1 }
                }
                RunState::Done(reason) => {
                    self.summary.stop_reason = Some(reason);
                    return Ok(self.summary.clone());
                }
            };
        }
    }

    async fn establish_session(&self) {
        match with_timeout(self.config.page_timeout, self.pages.establish_session()).await {
            Ok(()) => debug!("session ready"),
            Err(e) => warn!(error = %e, "couldn't establish a session, continuing without it"),
        }
    }

    /// Fetches and extracts one listing page, leaving only records worth ingesting.
    #[instrument(skip(self))]
    async fn fetch_page(&mut self, page: usize) -> Result<RunState> {
        if self.last_page.is_some_and(|last| page > last) {
            return Ok(RunState::Done(StopReason::LastPage));
        }

        info!("requesting listing page");
        let html = with_timeout(self.config.page_timeout, self.pages.fetch(page))
            .await
            .map_err(|e| match e {
                Error::PageFetch { .. } => e,
                other => Error::PageFetch {
                    page,
                    reason: other.to_string(),
                },
            })?;
        self.summary.pages_fetched += 1;

        let html = Arc::new(html);
        if page == 1 {
            self.dump_debug_html(&html).await;
        }

        let (records, total_results) = parse_page(self.extractor.clone(), html).await?;
        if page == 1 {
            self.last_page = self.page_bound(total_results);
            info!(?total_results, last_page = ?self.last_page, "pagination resolved");
        }

        let candidates = self.select_new(records);
        if candidates.is_empty() {
            info!("no new records on this page, stopping");
            return Ok(RunState::Done(StopReason::NoNewRecords));
        }
        Ok(RunState::Processing { page, candidates })
    }

    /// Number of the last page to fetch, from the advertised result count and
    /// the configured ceiling. `None` pages until novelty runs out.
    fn page_bound(&self, total_results: Option<usize>) -> Option<usize> {
        let advertised = total_results.map(|total| total.div_ceil(self.config.page_size).max(1));
        match (advertised, self.config.max_pages) {
            (Some(advertised), Some(ceiling)) => Some(advertised.min(ceiling)),
            (advertised, ceiling) => advertised.or(ceiling),
        }
    }

    /// Classifies the page's records and drops known, repeated and unwanted ones.
    fn select_new(&self, records: Vec<Record>) -> Vec<Record> {
        let found = records.len();
        let mut seen = HashSet::new();

        let candidates: Vec<Record> = records
            .into_iter()
            .filter_map(|mut record| {
                record.facets = classify(&record.title);
                if self.ledger.contains(&record.key) {
                    debug!(key = %record.key, "already stored, skipped");
                    return None;
                }
                if !seen.insert(record.key.clone()) {
                    debug!(key = %record.key, "repeated on the page, skipped");
                    return None;
                }
                if !self.config.keep_policy.keeps(&record.facets) {
                    debug!(key = %record.key, facets = ?record.facets, "filtered out");
                    return None;
                }
                Some(record)
            })
            .collect();

        info!(found, new = candidates.len(), "page extracted");
        candidates
    }

    /// Ingests the documents of one page on a bounded pool of workers and waits for all of them.
    /// The result keeps the order of `candidates`.
    async fn process_page(&self, candidates: Vec<Record>) -> Result<Vec<Record>> {
        let total = candidates.len();
        let (res_tx, mut res_rx) = mpsc::channel(total.max(1));
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut workers = JoinSet::new();

        for (position, record) in candidates.into_iter().enumerate() {
            // Wait for a free slot before spawning, so at most `workers` tasks exist.
            let permit = semaphore.clone().acquire_owned().await?;
            workers.spawn({
                let ingestor = self.ingestor.clone();
                let res_tx = res_tx.clone();
                let delay = self.config.request_delay;

                async move {
                    let _permit = permit;
                    let done = ingestor.ingest(record).await;
                    tokio::time::sleep(delay).await;
                    res_tx.send((position, done)).await?;
                    Ok::<_, Error>(())
                }
            });
        }
        drop(res_tx);

        let mut completed = Vec::with_capacity(total);
        while let Some(done) = res_rx.recv().await {
            completed.push(done);
        }
        while let Some(task) = workers.join_next().await {
            task??;
        }

        // Rows keep the listing order whatever order the workers finished in.
        completed.sort_unstable_by_key(|(position, _)| *position);
        Ok(completed.into_iter().map(|(_, record)| record).collect())
    }

    /// Appends the page's batch to the store, then records its keys in the ledger.
    async fn persist(&mut self, completed: Vec<Record>) -> Result<()> {
        let store = self.store.clone();
        let completed = spawn_blocking(move || {
            store
                .append_batch(&completed)
                .map(|()| completed)
        })
        .await??;

        for record in completed {
            match record.document_locator {
                Some(DocumentLocator::DownloadFailed) => self.summary.download_failures += 1,
                Some(DocumentLocator::UploadFailed) => self.summary.upload_failures += 1,
                _ => {}
            }
            self.summary.records_persisted += 1;
            self.ledger.add(record.key);
        }
        info!(
            persisted = self.summary.records_persisted,
            "progress saved"
        );
        Ok(())
    }

    async fn dump_debug_html(&self, html: &str) {
        let Some(dir) = &self.config.debug_html_dir else {
            return;
        };
        let path = dir.join("debug_page_1.html");
        let res = async {
            fs::create_dir_all(dir).await?;
            let mut file = File::create(&path).await?;
            file.write_all(html.as_bytes()).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        match res {
            Ok(()) => info!(path = %path.display(), "page markup saved for debugging"),
            Err(e) => warn!(path = %path.display(), error = %e, "couldn't save page markup"),
        }
    }
}
