//! Record of finished jobs, kept on disk for later listing and export.
//!
//! Appends never block the caller: the record lands in memory right away and
//! the file is rewritten on a background task. Persistence failures are
//! logged and otherwise ignored.

use crate::constants::{APP_DIR_NAME, HISTORY_FILE_NAME};
use crate::error::{CompressionError, Result};
use crate::job::{Job, JobStatus};
use crate::utils::write_atomically;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub file: PathBuf,
    pub before_size: u64,
    pub after_size: u64,
    pub saved_bytes: i64,
    pub saved_percent: f64,
    /// `success`, `failed` or `cancelled`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    /// Record for a job in a terminal state; `None` while it is still running.
    pub fn from_job(job: &Job) -> Option<Self> {
        let status = match job.status {
            JobStatus::Done => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Pending | JobStatus::Processing => return None,
        };

        Some(Self {
            timestamp: Utc::now(),
            file: job.path.clone(),
            before_size: job.original_size,
            after_size: job.compressed_size,
            saved_bytes: job.saved_bytes,
            saved_percent: job.saved_percent,
            status: status.to_string(),
            error: job.error.as_ref().map(|e| e.message.clone()),
        })
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct HistoryManager {
    path: PathBuf,
    records: Arc<RwLock<Vec<HistoryRecord>>>,
    save_lock: Arc<tokio::sync::Mutex<()>>,
}

impl HistoryManager {
    /// `<state dir>/tiny-squeeze/history.json`, falling back to the local
    /// data directory on platforms without a state directory.
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| {
                CompressionError::Config("could not determine the user state directory".to_string())
            })?;
        Ok(base.join(APP_DIR_NAME).join(HISTORY_FILE_NAME))
    }

    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// Loads history from `path`. A missing file is an empty history.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            records: Arc::new(RwLock::new(records)),
            save_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn all(&self) -> Vec<HistoryRecord> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<HistoryRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record and persists in the background.
    ///
    /// Outside a tokio runtime the file is written before returning.
    pub fn add(&self, record: HistoryRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.clone();
                handle.spawn(async move {
                    if let Err(err) = manager.flush().await {
                        warn!(error = %err, "Failed to persist history");
                    }
                });
            }
            Err(_) => {
                if let Err(err) = self.save() {
                    warn!(error = %err, "Failed to persist history");
                }
            }
        }
    }

    /// Writes the current records, serialised with any in-flight background save.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.save())
            .await
            .map_err(|e| CompressionError::Io(std::io::Error::other(e)))?
    }

    /// Writes the current records synchronously.
    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&*self.read())?;
        write_atomically(&self.path, &data, None)?;
        debug!(path = %self.path.display(), "History saved");
        Ok(())
    }

    pub fn to_csv(&self) -> String {
        let mut out =
            String::from("File,Before_Size,After_Size,Saved_Bytes,Saved_Percent,Status,Timestamp,Error\n");
        for record in self.read().iter() {
            let _ = writeln!(
                out,
                "{},{},{},{},{:.2},{},{},{}",
                csv_field(&record.file.display().to_string()),
                record.before_size,
                record.after_size,
                record.saved_bytes,
                record.saved_percent,
                csv_field(&record.status),
                record.timestamp.to_rfc3339(),
                csv_field(record.error.as_deref().unwrap_or("")),
            );
        }
        out
    }

    pub fn export_csv(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_csv())?;
        Ok(())
    }

    pub fn export_json(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(&*self.read())?;
        fs::write(path, data)?;
        Ok(())
    }
}
