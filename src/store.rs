use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::record::{Record, RecordKey};
use crate::{Error, Result};

/// Append-only durable store of persisted records.
pub trait RecordStore: Send + Sync {
    fn load_existing_keys(&self) -> Result<HashSet<RecordKey>>;

    /// Appends `records` and makes them durable before returning.
    fn append_batch(&self, records: &[Record]) -> Result<()>;
}

const KEY_COLUMN: &str = "numero_arrete";

/// One CSV row. Column names and order are fixed for the lifetime of a store.
#[derive(Debug, Serialize)]
struct Row<'a> {
    numero_arrete: &'a str,
    titre: &'a str,
    autorite_responsable: &'a str,
    signataire: &'a str,
    date_publication: &'a str,
    date_signature: &'a str,
    poids_pdf_ko: &'a str,
    concerne_circulation: bool,
    concerne_stationnement: bool,
    est_temporaire: bool,
    explnum_id: &'a str,
    pdf_s3_url: String,
    date_scrape: String,
}

impl<'a> From<&'a Record> for Row<'a> {
    fn from(r: &'a Record) -> Self {
        Self {
            numero_arrete: r.key.as_str(),
            titre: &r.title,
            autorite_responsable: &r.authority,
            signataire: &r.signer,
            date_publication: &r.publication_date,
            date_signature: &r.signature_date,
            poids_pdf_ko: &r.document_weight_kb,
            concerne_circulation: r.facets.concerns_traffic_flow,
            concerne_stationnement: r.facets.concerns_parking,
            est_temporaire: r.facets.is_temporary,
            explnum_id: &r.document_id,
            pdf_s3_url: r
                .document_locator
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            date_scrape: r.ingested_at.to_rfc3339(),
        }
    }
}

/// CSV file store. The header is written once, when the file is created.
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    path: PathBuf,
}

impl CsvRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for CsvRecordStore {
    fn load_existing_keys(&self) -> Result<HashSet<RecordKey>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no existing store, a new one will be created");
            return Ok(HashSet::new());
        }

        let mut file = File::open(&self.path)?;
        let torn_from = torn_tail(&mut file)?;
        match torn_from {
            Some(0) => {
                warn!(path = %self.path.display(), "store holds only a partial header, treating it as empty");
                return Ok(HashSet::new());
            }
            Some(offset) => warn!(offset, "store ends with an unterminated row, ignoring it"),
            None => {}
        }
        file.seek(SeekFrom::Start(0))?;

        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let key_idx = rdr
            .headers()?
            .iter()
            .position(|h| h == KEY_COLUMN)
            .ok_or_else(|| Error::Store(format!("missing column '{KEY_COLUMN}'")))?;

        let mut keys = HashSet::new();
        for (line, row) in rdr.records().enumerate() {
            match row {
                Ok(row)
                    if torn_from
                        .zip(row.position())
                        .is_some_and(|(torn, pos)| pos.byte() >= torn) => {}
                Ok(row) => match row.get(key_idx).map(str::trim) {
                    Some(key) if !key.is_empty() => {
                        keys.insert(RecordKey::new(key));
                    }
                    _ => warn!(line = line + 2, "row without a key, skipped"),
                },
                Err(e) => warn!(line = line + 2, error = %e, "unreadable row, skipped"),
            }
        }
        Ok(keys)
    }

    fn append_batch(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)?;
        // A row cut short by an interrupted write would swallow the next one.
        if let Some(offset) = torn_tail(&mut file)? {
            warn!(offset, path = %self.path.display(), "dropping an unterminated row left by an interrupted write");
            file.set_len(offset)?;
        }
        let is_new = file.metadata()?.len() == 0;
        file.seek(SeekFrom::End(0))?;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for record in records {
            wtr.serialize(Row::from(record))?;
        }
        let file = wtr.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        file.sync_data()?;

        info!(count = records.len(), path = %self.path.display(), "records appended");
        Ok(())
    }
}

/// Offset where an unterminated last row starts, `None` when the file is empty
/// or ends with a newline.
fn torn_tail(file: &mut File) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8 * 1024];
    let mut end = file.metadata()?.len();
    if end == 0 {
        return Ok(None);
    }

    let mut is_last_chunk = true;
    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if is_last_chunk && chunk.last() == Some(&b'\n') {
            return Ok(None);
        }
        is_last_chunk = false;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(Some(start + pos as u64 + 1));
        }
        end = start;
    }
    Ok(Some(0))
}
