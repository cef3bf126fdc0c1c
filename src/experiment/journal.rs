//! Append-only JSON-lines journal
//!
//! Line 1 is a header naming the format and version; every further line is
//! one [`Event`]. Appends are whole lines; a failed append rolls the file
//! back to its previous length.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ExperimentId, ExperimentRecord};
use crate::scope::Scope;
use crate::value::{measures_json, Measures};
use crate::{Error, Result};

/// Journal file name inside a store directory.
pub(crate) const JOURNAL_FILE: &str = "journal.jsonl";

const FORMAT: &str = "trueno-ema-journal";

/// On-disk journal format version written by this crate.
pub const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format: String,
    version: u32,
}

/// One durable state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum Event {
    ScopeDeclared {
        scope: Scope,
    },
    Reserved {
        records: Vec<ExperimentRecord>,
    },
    Completed {
        id: ExperimentId,
        #[serde(with = "measures_json")]
        measures: Measures,
        at: DateTime<Utc>,
    },
    Failed {
        id: ExperimentId,
        cause: String,
        at: DateTime<Utc>,
    },
    Archived {
        scope: String,
        ids: Vec<ExperimentId>,
        path: PathBuf,
    },
    /// Lowest id the store may hand out next; written by compaction so ids
    /// of archived experiments are never reused.
    Watermark {
        next_id: ExperimentId,
    },
}

#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    sync: bool,
}

impl Journal {
    /// Open (or create) the journal in `dir` and return the events it holds.
    pub(crate) fn open(dir: &Path, sync: bool) -> Result<(Self, Vec<Event>)> {
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (events, valid_len, has_header) = parse(&path, &bytes)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if (valid_len as usize) < bytes.len() {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let mut journal = Self {
            path,
            file,
            len: valid_len,
            sync,
        };
        if !has_header {
            let header = Header {
                format: FORMAT.to_string(),
                version: JOURNAL_VERSION,
            };
            journal.append_line(&serde_json::to_vec(&header)?)?;
        }
        debug!(
            path = %journal.path.display(),
            events = events.len(),
            "opened experiment journal"
        );
        Ok((journal, events))
    }

    /// Append one event as a single line.
    pub(crate) fn append(&mut self, event: &Event) -> Result<()> {
        let line = serde_json::to_vec(event)?;
        self.append_line(&line)
    }

    /// Rewrite the journal without archived experiments.
    ///
    /// The compacted journal is written next to the live one and renamed over
    /// it, so a crash leaves either the old or the new journal. Returns the
    /// number of events dropped.
    pub(crate) fn compact(&mut self) -> Result<usize> {
        let bytes = fs::read(&self.path)?;
        let (events, _, _) = parse(&self.path, &bytes)?;
        let before = events.len();
        let kept = compacted(events);
        let dropped = before.saturating_sub(kept.len());

        let tmp = self.path.with_extension("jsonl.tmp");
        let mut buf = serde_json::to_vec(&Header {
            format: FORMAT.to_string(),
            version: JOURNAL_VERSION,
        })?;
        buf.push(b'\n');
        for event in &kept {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(dir) = self.path.parent() {
            if let Ok(dir) = File::open(dir) {
                if let Err(e) = dir.sync_all() {
                    debug!(error = %e, "directory fsync unsupported");
                }
            }
        }

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.len = buf.len() as u64;
        debug!(
            path = %self.path.display(),
            kept = kept.len(),
            dropped,
            "compacted experiment journal"
        );
        Ok(dropped)
    }

    fn append_line(&mut self, line: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        let written = self.file.write_all(&buf).and_then(|()| {
            if self.sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // leave no partial line behind for later appends
            if let Err(rollback) = self.file.set_len(self.len) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial journal append"
                );
            }
            return Err(Error::StorageError(format!(
                "Failed to append to journal {}: {e}",
                self.path.display()
            )));
        }
        self.len += buf.len() as u64;
        Ok(())
    }
}

/// Drop every trace of archived experiments, keep the latest declaration of
/// each scope, and lead with a watermark past every id ever reserved.
fn compacted(events: Vec<Event>) -> Vec<Event> {
    let mut archived: BTreeSet<ExperimentId> = BTreeSet::new();
    let mut next_id = ExperimentId::new(1);
    let mut scopes: Vec<Scope> = Vec::new();
    for event in &events {
        match event {
            Event::Archived { ids, .. } => archived.extend(ids.iter().copied()),
            Event::Reserved { records } => {
                for record in records {
                    next_id = next_id.max(ExperimentId::new(record.experiment_id().get() + 1));
                }
            }
            Event::Watermark { next_id: mark } => next_id = next_id.max(*mark),
            Event::ScopeDeclared { scope } => {
                scopes.retain(|s| s.name() != scope.name());
                scopes.push(scope.clone());
            }
            Event::Completed { .. } | Event::Failed { .. } => {}
        }
    }

    let mut kept = vec![Event::Watermark { next_id }];
    kept.extend(scopes.into_iter().map(|scope| Event::ScopeDeclared { scope }));
    for event in events {
        match event {
            Event::Reserved { records } => {
                let records: Vec<ExperimentRecord> = records
                    .into_iter()
                    .filter(|r| !archived.contains(&r.experiment_id()))
                    .collect();
                if !records.is_empty() {
                    kept.push(Event::Reserved { records });
                }
            }
            Event::Completed { id, .. } | Event::Failed { id, .. } if archived.contains(&id) => {}
            event @ (Event::Completed { .. } | Event::Failed { .. }) => kept.push(event),
            Event::Archived { .. } | Event::Watermark { .. } | Event::ScopeDeclared { .. } => {}
        }
    }
    kept
}

/// Split the journal into events, tolerating a torn final line.
///
/// Returns the events, the byte length of the valid prefix, and whether a
/// complete header was found.
fn parse(path: &Path, bytes: &[u8]) -> Result<(Vec<Event>, u64, bool)> {
    let mut events = Vec::new();
    let mut header: Option<Header> = None;
    let mut offset = 0;
    let mut valid_len = 0;
    let mut line_no = 0;

    while offset < bytes.len() {
        let (line, next, terminated) = match bytes[offset..].iter().position(|b| *b == b'\n') {
            Some(i) => (&bytes[offset..offset + i], offset + i + 1, true),
            None => (&bytes[offset..], bytes.len(), false),
        };
        line_no += 1;

        if terminated && line.iter().all(u8::is_ascii_whitespace) {
            valid_len = next;
            offset = next;
            continue;
        }

        let parsed = if header.is_some() {
            serde_json::from_slice::<Event>(line).map(Some)
        } else {
            serde_json::from_slice::<Header>(line).map(|h| {
                header = Some(h);
                None
            })
        };

        let last = next >= bytes.len();
        match (parsed, terminated) {
            (Ok(event), true) => {
                events.extend(event);
                valid_len = next;
            }
            (Err(e), true) if !last => {
                return Err(Error::StorageError(format!(
                    "Corrupt journal {} at line {line_no}: {e}",
                    path.display()
                )));
            }
            // unterminated, or an unparsable final line: a torn write
            _ => {
                warn!(
                    path = %path.display(),
                    line = line_no,
                    bytes = line.len(),
                    "discarding torn trailing journal line"
                );
                if valid_len == 0 {
                    header = None;
                }
                break;
            }
        }
        offset = next;
    }

    if let Some(h) = &header {
        if h.format != FORMAT || h.version != JOURNAL_VERSION {
            return Err(Error::StorageError(format!(
                "Unsupported journal {}: format '{}' version {} (expected '{FORMAT}' version {JOURNAL_VERSION})",
                path.display(),
                h.format,
                h.version
            )));
        }
    }
    Ok((events, valid_len as u64, header.is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{measures, Value};

    fn completed(id: u64) -> Event {
        Event::Completed {
            id: ExperimentId::new(id),
            measures: measures([("m", 1.0)]),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_new_journal_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let (_journal, events) = Journal::open(dir.path(), false).unwrap();
        assert!(events.is_empty());
        let text = fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
        assert!(text.starts_with(r#"{"format":"trueno-ema-journal","version":1}"#));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut journal, _) = Journal::open(dir.path(), true).unwrap();
            journal.append(&completed(1)).unwrap();
            journal.append(&completed(2)).unwrap();
        }
        let (_journal, events) = Journal::open(dir.path(), false).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Event::Completed { id, .. } if id.get() == 2));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut journal, _) = Journal::open(dir.path(), false).unwrap();
            journal.append(&completed(1)).unwrap();
        }
        let path = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"event":"completed","id":2,"meas"#).unwrap();
        drop(file);

        let (mut journal, events) = Journal::open(dir.path(), false).unwrap();
        assert_eq!(events.len(), 1);
        journal.append(&completed(3)).unwrap();
        drop(journal);

        let (_journal, events) = Journal::open(dir.path(), false).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_unterminated_final_event_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut journal, _) = Journal::open(dir.path(), false).unwrap();
            journal.append(&completed(1)).unwrap();
        }
        // a complete event whose newline never reached the disk
        let path = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&serde_json::to_vec(&completed(2)).unwrap()).unwrap();
        drop(file);

        let (_journal, events) = Journal::open(dir.path(), false).unwrap();
        assert_eq!(events.len(), 1);
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn test_garbled_final_line_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut journal, _) = Journal::open(dir.path(), false).unwrap();
            journal.append(&completed(1)).unwrap();
        }
        let path = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"event\":\"comp\n").unwrap();
        drop(file);

        let (_journal, events) = Journal::open(dir.path(), false).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_compact_drops_archived_experiments() {
        let dir = tempfile::tempdir().unwrap();
        let reserved = |id: u64| {
            ExperimentRecord::new(
                ExperimentId::new(id),
                "s",
                "d1",
                crate::value::assignment([("x", Value::Int(i64::try_from(id).unwrap()))]),
            )
        };
        {
            let (mut journal, _) = Journal::open(dir.path(), false).unwrap();
            journal.append(&Event::Reserved { records: vec![reserved(1), reserved(2), reserved(3)] }).unwrap();
            journal.append(&completed(1)).unwrap();
            journal.append(&completed(3)).unwrap();
            journal
                .append(&Event::Archived {
                    scope: "s".to_string(),
                    ids: vec![ExperimentId::new(1), ExperimentId::new(3)],
                    path: PathBuf::from("archive"),
                })
                .unwrap();
            assert_eq!(journal.compact().unwrap(), 2);
            journal.append(&completed(2)).unwrap();
        }

        let (_journal, events) = Journal::open(dir.path(), false).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::Watermark { next_id } if next_id.get() == 4));
        match &events[1] {
            Event::Reserved { records } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].experiment_id().get(), 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(events[2], Event::Completed { id, .. } if id.get() == 2));
        assert!(!dir.path().join("journal.jsonl.tmp").exists());
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut journal, _) = Journal::open(dir.path(), false).unwrap();
            journal.append(&completed(1)).unwrap();
        }
        let path = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"garbage\n").unwrap();
        file.write_all(&serde_json::to_vec(&completed(2)).unwrap()).unwrap();
        file.write_all(b"\n").unwrap();
        drop(file);

        let err = Journal::open(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(JOURNAL_FILE),
            "{\"format\":\"trueno-ema-journal\",\"version\":99}\n",
        )
        .unwrap();
        assert!(matches!(
            Journal::open(dir.path(), false),
            Err(Error::StorageError(_))
        ));
    }
}
