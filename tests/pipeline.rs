use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrete_scrap::{
    blob::DryRunBlobStore,
    classify::KeepPolicy,
    parse::NoticeExtractor,
    record::{Record, RecordKey},
    request::{DocumentFetcher, FetchedDocument, PageFetcher},
    store::{CsvRecordStore, RecordStore},
    Collaborators, Config, Error, Pipeline, Result, StopReason,
};
use async_trait::async_trait;

/// Renders a listing page the way the site does. Each notice is `(key, document id, subject)`.
fn listing(total: usize, notices: &[(&str, &str, &str)]) -> String {
    let mut html = format!(
        r#"<html><body><div class="navbar">1 - {} / {total}</div>"#,
        notices.len()
    );
    for (key, id, subject) in notices {
        html.push_str(&format!(
            r#"<div class="notice_corps"><div class="descr_notice_corps">
                 <h3><a onclick="sendToVisionneuse({id})">Arrêté n° {key} réglementant {subject}</a></h3>
                 <span class="auteur_notCourte">Direction de la Voirie</span>
               </div></div>"#
        ));
    }
    html.push_str("</body></html>");
    html
}

fn traffic(keys: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str, &'static str)> {
    keys.iter()
        .map(|(key, id)| (*key, *id, "la circulation"))
        .collect()
}

#[derive(Default)]
struct ScriptedPages {
    pages: HashMap<usize, String>,
    fail_on: Option<usize>,
    session_fails: bool,
    fetched: Mutex<Vec<usize>>,
    closed: AtomicBool,
}

impl ScriptedPages {
    fn new(pages: impl IntoIterator<Item = (usize, String)>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            ..Self::default()
        }
    }

    fn fetched(&self) -> Vec<usize> {
        self.fetched.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedPages {
    async fn establish_session(&self) -> Result<()> {
        if self.session_fails {
            return Err(Error::PageFetch {
                page: 0,
                reason: "home page unreachable".into(),
            });
        }
        Ok(())
    }

    async fn fetch(&self, page_num: usize) -> Result<String> {
        self.fetched.lock().expect("lock").push(page_num);
        if self.fail_on == Some(page_num) {
            return Err(Error::PageFetch {
                page: page_num,
                reason: "connection reset".into(),
            });
        }
        Ok(self
            .pages
            .get(&page_num)
            .cloned()
            .unwrap_or_else(|| listing(0, &[])))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Serves the same document for every id and tracks how many fetches overlap.
struct StubDocuments {
    content_type: &'static str,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubDocuments {
    fn new(content_type: &'static str) -> Self {
        Self {
            content_type,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentFetcher for StubDocuments {
    async fn fetch(&self, document_id: &str) -> Result<FetchedDocument> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(FetchedDocument {
            bytes: format!("%PDF-1.4 {document_id}").into_bytes(),
            content_type: self.content_type.to_string(),
        })
    }
}

fn config(page_size: usize) -> Config {
    Config {
        dry_run: true,
        page_size,
        workers: 3,
        request_delay: Duration::ZERO,
        page_timeout: Duration::from_secs(5),
        fetch_timeout: Duration::from_secs(5),
        store_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn pipeline(
    config: Config,
    pages: Arc<ScriptedPages>,
    documents: Arc<StubDocuments>,
    csv: &Path,
) -> Pipeline {
    Pipeline::new(
        config,
        Collaborators {
            pages,
            extractor: Arc::new(NoticeExtractor::new().expect("selectors are valid")),
            documents,
            blobs: Arc::new(DryRunBlobStore::new(None)),
            store: Arc::new(CsvRecordStore::new(csv)),
        },
    )
    .expect("config is valid")
}

/// Rows of the store as (key, locator) pairs, in file order.
fn rows(csv: &Path) -> Vec<(String, String)> {
    let mut rdr = csv::Reader::from_path(csv).expect("store is readable");
    let headers = rdr.headers().expect("headers").clone();
    let key_idx = headers.iter().position(|h| h == "numero_arrete").expect("key column");
    let loc_idx = headers.iter().position(|h| h == "pdf_s3_url").expect("locator column");
    rdr.records()
        .map(|row| {
            let row = row.expect("row");
            (row[key_idx].to_string(), row[loc_idx].to_string())
        })
        .collect()
}

fn two_pages() -> Arc<ScriptedPages> {
    Arc::new(ScriptedPages::new([
        (
            1,
            listing(6, &traffic(&[("2025 T 6", "6"), ("2025 T 5", "5"), ("2025 T 4", "4")])),
        ),
        (
            2,
            listing(6, &traffic(&[("2025 T 3", "3"), ("2025 T 2", "2"), ("2025 T 1", "1")])),
        ),
    ]))
}

#[tokio::test]
async fn test_second_run_adds_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let pages = two_pages();
    let summary = pipeline(config(3), pages.clone(), Arc::new(StubDocuments::new("application/pdf")), &csv)
        .run()
        .await
        .expect("first run");
    assert_eq!(summary.records_persisted, 6);
    assert_eq!(summary.stop_reason, Some(StopReason::LastPage));
    assert_eq!(pages.fetched(), vec![1, 2]);
    assert!(pages.closed.load(Ordering::SeqCst));

    let pages = two_pages();
    let summary = pipeline(config(3), pages.clone(), Arc::new(StubDocuments::new("application/pdf")), &csv)
        .run()
        .await
        .expect("second run");
    assert_eq!(summary.records_persisted, 0);
    assert_eq!(summary.stop_reason, Some(StopReason::NoNewRecords));
    assert_eq!(pages.fetched(), vec![1]);
    assert_eq!(rows(&csv).len(), 6);
}

#[tokio::test]
async fn test_failure_keeps_completed_pages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let pages = Arc::new(ScriptedPages {
        fail_on: Some(2),
        ..ScriptedPages::new([
            (1, listing(9, &traffic(&[("2025 T 9", "9"), ("2025 T 8", "8"), ("2025 T 7", "7")]))),
            (3, listing(9, &traffic(&[("2025 T 3", "3")]))),
        ])
    });
    let res = pipeline(config(3), pages.clone(), Arc::new(StubDocuments::new("application/pdf")), &csv)
        .run()
        .await;

    assert!(matches!(res, Err(Error::PageFetch { page: 2, .. })));
    assert!(pages.closed.load(Ordering::SeqCst));
    assert_eq!(pages.fetched(), vec![1, 2]);

    let stored: Vec<String> = rows(&csv).into_iter().map(|(key, _)| key).collect();
    assert_eq!(stored, vec!["2025 T 9", "2025 T 8", "2025 T 7"]);

    // Restarting sees page 1 as already stored and writes no duplicate.
    let pages = Arc::new(ScriptedPages::new([(
        1,
        listing(9, &traffic(&[("2025 T 9", "9"), ("2025 T 8", "8"), ("2025 T 7", "7")])),
    )]));
    let summary = pipeline(config(3), pages, Arc::new(StubDocuments::new("application/pdf")), &csv)
        .run()
        .await
        .expect("restart");
    assert_eq!(summary.records_persisted, 0);

    let keys: HashSet<String> = rows(&csv).into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys.len(), 3);
    assert_eq!(rows(&csv).len(), 3);
}

#[tokio::test]
async fn test_unprocessable_notices_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let mut page = listing(4, &traffic(&[("2025 T 2", "2"), ("2025 T 1", "1")]));
    page = page.replace(
        "</body>",
        r#"<div class="notice_corps"><h3>Arrêté n° 2025 T 3 sans document</h3></div>
           <div class="notice_corps"><h3><a onclick="sendToVisionneuse(4)">Arrêté n° illisible</a></h3></div>
           </body>"#,
    );
    let pages = Arc::new(ScriptedPages::new([(1, page)]));

    let summary = pipeline(config(50), pages, Arc::new(StubDocuments::new("application/pdf")), &csv)
        .run()
        .await
        .expect("run");
    assert_eq!(summary.records_persisted, 2);

    let keys: Vec<String> = rows(&csv).into_iter().map(|(key, _)| key).collect();
    assert!(!keys.contains(&"2025 T 3".to_string()));
    assert_eq!(keys.len(), 2);
}

#[tokio::test]
async fn test_metadata_survives_download_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let pages = Arc::new(ScriptedPages::new([(
        1,
        listing(3, &traffic(&[("2025 T 3", "3"), ("2025 T 2", "2"), ("2025 T 1", "1")])),
    )]));
    let summary = pipeline(config(50), pages, Arc::new(StubDocuments::new("text/html")), &csv)
        .run()
        .await
        .expect("run");

    assert_eq!(summary.records_persisted, 3);
    assert_eq!(summary.download_failures, 3);
    for (_, locator) in rows(&csv) {
        assert_eq!(locator, "ERROR: download failed");
    }
    let content = std::fs::read_to_string(&csv).expect("read");
    assert!(content.contains("Arrêté n° 2025 T 2 réglementant la circulation"));
    assert!(content.contains("Direction de la Voirie"));
}

#[tokio::test]
async fn test_stops_on_page_without_new_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let known: Vec<Record> = ["2025 T 6", "2025 T 5", "2025 T 4"]
        .into_iter()
        .map(|key| Record::new(RecordKey::new(key), format!("Arrêté n° {key}"), "0"))
        .collect();
    CsvRecordStore::new(&csv).append_batch(&known).expect("seed store");

    let pages = Arc::new(ScriptedPages::new([
        (1, listing(9, &traffic(&[("2025 T 9", "9"), ("2025 T 8", "8"), ("2025 T 7", "7")]))),
        (2, listing(9, &traffic(&[("2025 T 6", "6"), ("2025 T 5", "5"), ("2025 T 4", "4")]))),
        (3, listing(9, &traffic(&[("2025 T 3", "3"), ("2025 T 2", "2"), ("2025 T 1", "1")]))),
    ]));
    let summary = pipeline(config(3), pages.clone(), Arc::new(StubDocuments::new("application/pdf")), &csv)
        .run()
        .await
        .expect("run");

    assert_eq!(pages.fetched(), vec![1, 2]);
    assert_eq!(summary.records_persisted, 3);
    assert_eq!(summary.stop_reason, Some(StopReason::NoNewRecords));
    assert_eq!(rows(&csv).len(), 6);
}

#[tokio::test]
async fn test_worker_bound_is_respected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let notices: Vec<(String, String)> = (1..=10)
        .map(|n| (format!("2025 T {n}"), n.to_string()))
        .collect();
    let notices: Vec<(&str, &str, &str)> = notices
        .iter()
        .map(|(key, id)| (key.as_str(), id.as_str(), "la circulation"))
        .collect();
    let pages = Arc::new(ScriptedPages::new([(1, listing(10, &notices))]));
    let documents = Arc::new(StubDocuments {
        delay: Duration::from_millis(20),
        ..StubDocuments::new("application/pdf")
    });

    let summary = pipeline(
        Config {
            workers: 2,
            ..config(10)
        },
        pages,
        documents.clone(),
        &csv,
    )
    .run()
    .await
    .expect("run");

    assert_eq!(summary.records_persisted, 10);
    let max = documents.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=2).contains(&max), "{max} documents were fetched at once");
}

#[tokio::test]
async fn test_page_ceiling() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let pages = two_pages();
    let summary = pipeline(
        Config {
            max_pages: Some(1),
            ..config(3)
        },
        pages.clone(),
        Arc::new(StubDocuments::new("application/pdf")),
        &csv,
    )
    .run()
    .await
    .expect("run");

    assert_eq!(pages.fetched(), vec![1]);
    assert_eq!(summary.records_persisted, 3);
    assert_eq!(summary.stop_reason, Some(StopReason::LastPage));
}

#[tokio::test]
async fn test_keep_policy_filters_before_processing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let pages = Arc::new(ScriptedPages::new([(
        1,
        listing(
            3,
            &[
                ("2025 P 3", "3", "le stationnement"),
                ("2025 T 2", "2", "la circulation"),
                ("2025 P 1", "1", "les aires de livraison"),
            ],
        ),
    )]));
    let summary = pipeline(
        Config {
            keep_policy: KeepPolicy::ParkingOnly,
            ..config(50)
        },
        pages,
        Arc::new(StubDocuments::new("application/pdf")),
        &csv,
    )
    .run()
    .await
    .expect("run");

    assert_eq!(summary.records_persisted, 2);
    let keys: Vec<String> = rows(&csv).into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["2025 P 3", "2025 P 1"]);
}

#[tokio::test]
async fn test_dry_run_locators_and_failed_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");

    let pages = Arc::new(ScriptedPages {
        session_fails: true,
        ..ScriptedPages::new([(1, listing(1, &traffic(&[("2025 T 17858", "44443")])))])
    });
    let summary = pipeline(config(50), pages.clone(), Arc::new(StubDocuments::new("application/pdf")), &csv)
        .run()
        .await
        .expect("a failed warm-up isn't fatal");

    assert_eq!(summary.records_persisted, 1);
    assert!(pages.closed.load(Ordering::SeqCst));
    let (key, locator) = rows(&csv).remove(0);
    assert_eq!(key, "2025 T 17858");
    assert!(locator.starts_with("s3://dry-run-bucket/records/2025/2025_T_17858_"));
    assert!(locator.ends_with(".pdf"));
}

#[tokio::test]
async fn test_debug_markup_dump() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("arretes.csv");
    let debug_dir = dir.path().join("debug");

    let pages = Arc::new(ScriptedPages::new([(1, listing(1, &traffic(&[("2025 T 1", "1")])))]));
    pipeline(
        Config {
            debug_html_dir: Some(debug_dir.clone()),
            ..config(50)
        },
        pages,
        Arc::new(StubDocuments::new("application/pdf")),
        &csv,
    )
    .run()
    .await
    .expect("run");

    let dumped = std::fs::read_to_string(debug_dir.join("debug_page_1.html")).expect("dump exists");
    assert!(dumped.contains("2025 T 1"));
}
