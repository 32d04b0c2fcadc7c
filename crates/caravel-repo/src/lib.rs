//! Caravel Repo - chart repository synchronization
//!
//! This crate keeps the catalog eventually consistent with upstream chart
//! repositories:
//!
//! - **Index model**: Helm-compatible `index.yaml` parsing with duplicate
//!   collapse per semantic version
//! - **Fetching**: HTTP(S) indexes with credentials and TLS options, plus
//!   OCI tag listings for `oci://` repositories
//! - **Synchronizer**: digest-based diffing against the existing catalog;
//!   an unchanged index performs zero writes

pub mod catalog;
pub mod error;
pub mod fetch;
pub mod index;
pub mod sync;

pub use catalog::{CatalogCounts, CatalogStore, MemoryCatalog};
pub use error::{RepoError, Result};
pub use fetch::{IndexFetcher, resolve_pull_url};
pub use index::{ChartEntry, RepositoryIndex};
pub use sync::{SyncSummary, Synchronizer};
