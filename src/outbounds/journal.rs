//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                   | Description                                      | Key Methods       |
// |------------------------|--------------------------------------------------|------------------|
// | JournalTransactionLog  | Appends trade records to rotating JSONL files    | append            |
//--------------------------------------------------------------------------------------------------

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::models::types::TradeRecord;

use super::{StoreError, StoreResult, TransactionLog};

/// File-backed audit trail: one serialized [`TradeRecord`] per line, rotated to
/// a fresh timestamped file every `max_records_per_file` appends.
pub struct JournalTransactionLog {
    /// Directory the journal files are written to.
    output_dir: std::path::PathBuf,
    /// File handle for current write operations.
    current_file: Mutex<Option<tokio::fs::File>>,
    /// Maximum records per file before rotation.
    max_records_per_file: usize,
    /// Record count in the current file.
    record_count: AtomicUsize,
}

impl JournalTransactionLog {
    /// Creates a new journal writing into `output_dir`, creating the directory
    /// if needed.
    pub fn new<P: AsRef<Path>>(output_dir: P, max_records_per_file: usize) -> std::io::Result<Self> {
        let path = output_dir.as_ref().to_path_buf();

        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }

        Ok(Self {
            output_dir: path,
            current_file: Mutex::new(None),
            max_records_per_file,
            record_count: AtomicUsize::new(0),
        })
    }

    /// Opens a new file for writing records.
    async fn open_new_file(&self) -> std::io::Result<tokio::fs::File> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let filename = format!("trades_{}.jsonl", timestamp);
        let path = self.output_dir.join(filename);

        debug!("Opening new journal file: {:?}", path);

        let file = tokio::fs::File::create(path).await?;
        self.record_count.store(0, Ordering::SeqCst);

        Ok(file)
    }

    /// Writes a record to the current file, rotating if needed.
    async fn write_record(&self, record: &TradeRecord) -> std::io::Result<()> {
        let mut file_guard = self.current_file.lock().await;

        if file_guard.is_none()
            || self.record_count.load(Ordering::SeqCst) >= self.max_records_per_file
        {
            *file_guard = Some(self.open_new_file().await?);
        }

        let file = match file_guard.as_mut() {
            Some(file) => file,
            None => unreachable!("journal file initialized above"),
        };

        let json = serde_json::to_string(record)?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        self.record_count.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

#[async_trait]
impl TransactionLog for JournalTransactionLog {
    async fn append(&self, record: TradeRecord) -> StoreResult<()> {
        self.write_record(&record)
            .await
            .map_err(|e| StoreError::Unavailable(format!("journal write failed: {}", e)))
    }
}
