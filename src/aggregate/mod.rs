//! Streaming artifact aggregation
//!
//! An artifact is a ZIP container. Entries are read one at a time straight off the network
//! stream, and every entry whose name ends with the configured extension is parsed as a
//! JSON document of matched records. Each record is handed to a [`RecordSink`] as soon as
//! it has been parsed, so memory use is bounded by the largest single record.
//!
//! Two document shapes are accepted for an entry:
//! - a top-level array of records
//! - an object whose `matchedProducts` member is an array of records (or `null`)

mod archive;
mod sink;

pub use sink::{JsonReportSink, RecordSink};

use crate::error::{Error, Result};
use crate::service::ArtifactStream;
use futures::StreamExt;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::value::RawValue;
use std::io::{BufReader, Cursor, Read};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

const MATCHED_KEY: &str = "matchedProducts";

/// Fuses decompression and JSON parsing of an artifact into sink appends
#[derive(Clone, Debug)]
pub struct StreamAggregator {
    entry_extension: String,
}

impl StreamAggregator {
    /// Aggregate entries whose names end with `entry_extension` (case-insensitive)
    pub fn new(entry_extension: impl Into<String>) -> Self {
        Self {
            entry_extension: entry_extension.into(),
        }
    }

    /// Stream `artifact` into `sink`
    ///
    /// Parsing runs on the blocking pool and pulls bytes from the network as it goes, so a
    /// slow sink stalls the download instead of buffering it. The sink is handed back with
    /// the outcome so the caller can roll back a failed group. The outer error is returned
    /// only when the worker did not finish normally, in which case the sink is lost.
    ///
    /// Cancelling `cancel` ends the artifact stream, so a worker waiting on the network
    /// returns [`Error::Cancelled`] instead of waiting for more bytes.
    pub async fn aggregate<S>(
        &self,
        job_id: &str,
        artifact: ArtifactStream,
        mut sink: S,
        cancel: &CancellationToken,
    ) -> Result<(S, Result<u64>)>
    where
        S: RecordSink + Send + 'static,
    {
        let cancel = cancel.clone();
        let stop = cancel.clone();
        let artifact: ArtifactStream =
            Box::pin(artifact.take_until(async move { stop.cancelled().await }));
        let reader = SyncIoBridge::new(StreamReader::new(artifact));
        let job_id = job_id.to_string();
        let extension = self.entry_extension.clone();

        let worker = tokio::task::spawn_blocking(move || {
            let outcome = aggregate_reader(&job_id, reader, &mut sink, &extension, &cancel);
            (sink, outcome)
        });

        worker.await.map_err(|e| {
            error!(error = %e, "aggregation worker failed");
            Error::Other(format!("aggregation worker failed: {e}"))
        })
    }
}

/// Read a ZIP stream entry by entry and append matched records to `sink`
///
/// Entries are visited in the order they are stored. Non-matching entries are skipped by
/// draining them. Entries written with a trailing data descriptor are staged in memory one
/// at a time; all others stream straight through. Returns the number of records appended.
pub fn aggregate_reader<R, S>(
    job_id: &str,
    reader: R,
    sink: &mut S,
    entry_extension: &str,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: Read,
    S: RecordSink,
{
    let extension = entry_extension.to_ascii_lowercase();
    let mut reader = BufReader::new(reader);
    let mut forward = Forward {
        sink,
        cancel,
        records: 0,
        halted: None,
    };
    let mut entries = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let header = match archive::next_local_header(&mut reader) {
            Ok(Some(header)) => header,
            Ok(None) => break,
            Err(e) => {
                return Err(stopped(job_id, cancel, None, || format!("invalid archive: {e}")));
            }
        };

        let mut staged;
        let mut direct;
        let mut source: &mut dyn Read = if archive::has_data_descriptor(&header) {
            let bytes = archive::stage_entry(header, &mut reader).map_err(|e| {
                stopped(job_id, cancel, None, || format!("invalid archive: {e}"))
            })?;
            staged = Cursor::new(bytes);
            &mut staged
        } else {
            direct = (&header[..]).chain(&mut reader);
            &mut direct
        };

        let entry = match zip::read::read_zipfile_from_stream(&mut source) {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                return Err(stopped(job_id, cancel, None, || format!("invalid archive: {e}")));
            }
        };

        let name = entry.name().to_string();
        if entry.is_dir() || !name.to_ascii_lowercase().ends_with(&extension) {
            trace!(%job_id, entry = %name, "skipping entry");
            continue;
        }

        entries += 1;
        let before = forward.records;
        if let Err(e) = forward_entry(entry, &mut forward) {
            let halted = forward.halted.take();
            return Err(stopped(job_id, cancel, halted, || format!("entry '{name}': {e}")));
        }
        debug!(%job_id, entry = %name, records = forward.records - before, "entry aggregated");
    }

    info!(%job_id, entries, records = forward.records, "artifact aggregated");
    Ok(forward.records)
}

/// Pick the error that ended a walk: a sink failure, then cancellation, then corruption
fn stopped(
    job_id: &str,
    cancel: &CancellationToken,
    halted: Option<Error>,
    reason: impl FnOnce() -> String,
) -> Error {
    match halted {
        Some(e) => e,
        None if cancel.is_cancelled() => Error::Cancelled,
        None => Error::StreamCorruption {
            job_id: job_id.to_string(),
            reason: reason(),
        },
    }
}

fn forward_entry<R: Read>(entry: R, forward: &mut Forward<'_>) -> serde_json::Result<()> {
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(entry));
    Document(forward).deserialize(&mut de)?;
    de.end()
}

/// Shared state threaded through the seeds below
struct Forward<'a> {
    sink: &'a mut dyn RecordSink,
    cancel: &'a CancellationToken,
    records: u64,
    /// Non-parse error that stopped the walk; takes precedence over the parse error
    halted: Option<Error>,
}

impl Forward<'_> {
    fn forward_all<'de, A: SeqAccess<'de>>(
        &mut self,
        mut seq: A,
    ) -> std::result::Result<(), A::Error> {
        while let Some(record) = seq.next_element::<Box<RawValue>>()? {
            if self.cancel.is_cancelled() {
                self.halted = Some(Error::Cancelled);
                return Err(de::Error::custom("cancelled"));
            }
            if let Err(e) = self.sink.append(&record) {
                self.halted = Some(e);
                return Err(de::Error::custom("sink rejected record"));
            }
            self.records += 1;
        }
        Ok(())
    }
}

/// Top level of an entry: a record array or an object wrapping one
struct Document<'f, 'a>(&'f mut Forward<'a>);

impl<'de> DeserializeSeed<'de> for Document<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for Document<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "an array of records or an object with a `{MATCHED_KEY}` array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> std::result::Result<(), A::Error> {
        self.0.forward_all(seq)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let mut seen = false;
        while let Some(key) = map.next_key::<String>()? {
            if key == MATCHED_KEY && !seen {
                seen = true;
                map.next_value_seed(RecordArray(&mut *self.0))?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

/// The `matchedProducts` member; `null` means no records
struct RecordArray<'f, 'a>(&'f mut Forward<'a>);

impl<'de> DeserializeSeed<'de> for RecordArray<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for RecordArray<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("an array of records or null")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<(), E> {
        Ok(())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> std::result::Result<(), A::Error> {
        self.0.forward_all(seq)
    }
}
