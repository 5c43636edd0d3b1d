//! Incremental scraper for the municipal bulletin of traffic and parking orders.
//!
//! Every run walks the paginated listing newest first, skips orders already in
//! the record store, archives each new order's PDF in object storage and appends
//! one row per order to a CSV file, page by page. A page with no new order ends
//! the run.

mod error;
mod macros;

pub mod blob;
pub mod classify;
pub mod config;
pub mod ingest;
pub mod ledger;
pub mod parse;
pub mod process;
pub mod record;
pub mod request;
pub mod s3;
pub mod store;

pub use config::{Config, StorageConfig};
pub use error::{Error, Result};
pub use process::{Collaborators, Pipeline, RunSummary, StopReason};

pub const DEFAULT_BASE_URL: &str = "https://bovp.apps.paris.fr";
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Documents fetched and stored at once.
pub const DEFAULT_WORKERS: usize = 5;
