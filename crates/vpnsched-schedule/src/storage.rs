use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::store::ScheduleStore;

const USER_AGENT: &str = concat!("vpnsched/", env!("CARGO_PKG_VERSION"));
const FETCH_TIMEOUT_SECS: u64 = 30;

/// File-backed storage for the schedule document.
///
/// The file always holds a document that parsed successfully: new content is
/// validated before it is written, and writes go through a temp file + rename
/// so a crash mid-write never leaves a truncated schedule behind.
#[derive(Debug, Clone)]
pub struct ScheduleFile {
    path: PathBuf,
}

impl ScheduleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the stored document.
    pub fn load(&self) -> Result<ScheduleStore> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        let store = ScheduleStore::parse(&text)?;
        debug!(path = %self.path.display(), entries = store.len(), "schedule loaded");
        Ok(store)
    }

    /// Like [`load`](Self::load), but a missing file is an empty schedule.
    pub fn load_or_empty(&self) -> Result<ScheduleStore> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no schedule file, using empty schedule");
            return Ok(ScheduleStore::default());
        }
        self.load()
    }

    /// Write `store` in canonical form.
    pub fn save(&self, store: &ScheduleStore) -> Result<()> {
        self.write_atomic(&store.serialize())
    }

    /// Validate `document` and, only if it parses, make it the stored schedule.
    ///
    /// The document is written as given, comments included.
    pub fn install(&self, document: &str) -> Result<ScheduleStore> {
        let store = ScheduleStore::parse(document)?;
        self.write_atomic(document)?;
        info!(path = %self.path.display(), entries = store.len(), "schedule installed");
        Ok(store)
    }

    /// Download a document from `url` and [`install`](Self::install) it.
    pub async fn fetch(&self, url: &str) -> Result<ScheduleStore> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;

        let document = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        info!(%url, bytes = document.len(), "schedule downloaded");
        self.install(&document)
    }

    fn write_atomic(&self, contents: &str) -> Result<()> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(io_err)?;

        // Unique temp name per writer, so concurrent installs never share one.
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(contents.as_bytes()).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
