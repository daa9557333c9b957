//! Destinations for aggregated records

use crate::error::{Error, Result};
use serde_json::value::RawValue;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DOCUMENT_OPEN: &[u8] = br#"{"matchedProducts":["#;
const DOCUMENT_CLOSE: &[u8] = br#"],"matchingProductErrors":null}"#;

/// Single-writer destination for matched records
///
/// Records are appended in the order they are extracted. `checkpoint` and `rollback` bound
/// one group's writes so a failed group leaves nothing behind. `seal` consumes the sink, so
/// it can only ever run once.
pub trait RecordSink {
    /// Append one record to the aggregated array
    fn append(&mut self, record: &RawValue) -> Result<()>;

    /// Mark the current end of output as the restore point for [`rollback`](Self::rollback)
    fn checkpoint(&mut self) -> Result<()>;

    /// Discard everything appended since the last checkpoint
    fn rollback(&mut self) -> Result<()>;

    /// Records appended so far (after rollbacks)
    fn records(&self) -> u64;

    /// Write the closing structure and publish the document; returns the record count
    fn seal(self) -> Result<u64>
    where
        Self: Sized;
}

/// Writes `{"matchedProducts":[...],"matchingProductErrors":null}` to a file
///
/// While the run is in progress the document lives at `<path>.partial`. Sealing renames
/// it to `path`, so a reader never sees an unterminated document. Dropping an unsealed
/// sink deletes the partial file.
#[derive(Debug)]
pub struct JsonReportSink {
    path: PathBuf,
    partial_path: PathBuf,
    writer: Option<BufWriter<File>>,
    position: u64,
    records: u64,
    checkpoint: (u64, u64),
}

impl JsonReportSink {
    /// Create (or truncate) the partial document next to `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let partial_path = partial_path_for(&path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(DOCUMENT_OPEN)?;
        let position = DOCUMENT_OPEN.len() as u64;

        debug!(path = ?partial_path, "opened output document");
        Ok(Self {
            path,
            partial_path,
            writer: Some(writer),
            position,
            records: 0,
            checkpoint: (position, 0),
        })
    }

    /// Final location of the sealed document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the document while it is being written
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::Other("output document already closed".to_string()))
    }
}

impl RecordSink for JsonReportSink {
    fn append(&mut self, record: &RawValue) -> Result<()> {
        let separator: &[u8] = if self.records > 0 { b"," } else { b"" };
        let raw = record.get().as_bytes();

        let writer = self.writer()?;
        writer.write_all(separator)?;
        writer.write_all(raw)?;

        self.position += (separator.len() + raw.len()) as u64;
        self.records += 1;
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.checkpoint = (self.position, self.records);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let (position, records) = self.checkpoint;
        if position == self.position {
            return Ok(());
        }

        let writer = self.writer()?;
        writer.flush()?;
        let file = writer.get_mut();
        file.set_len(position)?;
        file.seek(SeekFrom::Start(position))?;

        warn!(
            discarded = self.records - records,
            "rolled output back to last checkpoint"
        );
        self.position = position;
        self.records = records;
        Ok(())
    }

    fn records(&self) -> u64 {
        self.records
    }

    fn seal(mut self) -> Result<u64> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Other("output document already closed".to_string()))?;
        writer.write_all(DOCUMENT_CLOSE)?;
        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.partial_path, &self.path)?;
        info!(path = ?self.path, records = self.records, "output document sealed");
        Ok(self.records)
    }
}

impl Drop for JsonReportSink {
    fn drop(&mut self) {
        if self.writer.take().is_some()
            && let Err(e) = std::fs::remove_file(&self.partial_path)
        {
            warn!(path = ?self.partial_path, error = %e, "failed to remove unsealed output");
        }
    }
}

fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
