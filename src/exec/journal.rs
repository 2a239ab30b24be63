// exec/journal.rs
//! Append-only, fsync'd JSONL journal (spec §4.5, §6). Unlike a
//! best-effort diagnostic log, an unjournaled mutation is a safety
//! violation here: there is no fallback-path or stderr degradation —
//! if the journal can't be durably written, the whole execution is
//! Fatal (spec §7 "Fatal only when the journal cannot be written").

use crate::error::FileMoverError;
use crate::model::{JournalEntry, JournalResult, OpKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct JournalHeader {
    version: u32,
    started_utc: chrono::DateTime<chrono::Utc>,
}

struct Inner {
    file: File,
}

/// Guards the single append-only journal file for the duration of one
/// execution session (spec §5 "the journal file is append-only,
/// guarded by a mutex").
pub struct JournalWriter {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JournalWriter {
    /// Opens (creating if absent) `path` and writes the header line.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, FileMoverError> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| FileMoverError::io(path.clone(), e))?;

        let header = JournalHeader {
            version: 1,
            started_utc: chrono::Utc::now(),
        };
        write_line(&mut file, &header).map_err(|e| FileMoverError::io(path.clone(), e))?;
        fsync(&file).map_err(|e| FileMoverError::io(path.clone(), e))?;

        Ok(Self {
            path,
            inner: Mutex::new(Inner { file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one journal line and fsyncs before returning, per the
    /// happens-before ordering spec §5 requires between a journal write
    /// and the filesystem mutation it describes.
    pub fn append(&self, entry: &JournalEntry) -> Result<(), FileMoverError> {
        let mut guard = self.inner.lock();
        write_line(&mut guard.file, entry).map_err(|e| FileMoverError::io(self.path.clone(), e))?;
        fsync(&guard.file).map_err(|e| FileMoverError::io(self.path.clone(), e))?;
        Ok(())
    }

    pub fn attempt(&self, source: PathBuf, dest: PathBuf, op: OpKind) -> Result<(), FileMoverError> {
        self.append(&JournalEntry {
            when_utc: chrono::Utc::now(),
            source,
            dest,
            op,
            result: JournalResult::Pending,
            message: None,
            dest_size: None,
            dest_mtime: None,
        })
    }

    pub fn commit(
        &self,
        source: PathBuf,
        dest: PathBuf,
        op: OpKind,
        result: JournalResult,
        message: Option<String>,
    ) -> Result<(), FileMoverError> {
        let (dest_size, dest_mtime) = if result == JournalResult::Ok {
            probe_dest_metadata(&dest)
        } else {
            (None, None)
        };
        self.append(&JournalEntry {
            when_utc: chrono::Utc::now(),
            source,
            dest,
            op,
            result,
            message,
            dest_size,
            dest_mtime,
        })
    }
}

/// Captures the destination's size (files only) and mtime right after a
/// successful move, for undo's size+mtime "modified post-move" check.
/// Best-effort: a stat failure just means the heuristic has nothing to
/// compare against later, not a journal-write failure.
fn probe_dest_metadata(dest: &Path) -> (Option<u64>, Option<chrono::DateTime<chrono::Utc>>) {
    match std::fs::metadata(dest) {
        Ok(meta) => {
            let size = meta.is_file().then(|| meta.len());
            let mtime = meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);
            (size, mtime)
        }
        Err(_) => (None, None),
    }
}

fn write_line<T: Serialize>(file: &mut File, value: &T) -> std::io::Result<()> {
    let line = serde_json::to_string(value)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn fsync(file: &File) -> std::io::Result<()> {
    file.sync_data()
}

/// Reads every entry of a journal back, skipping the header line. A
/// trailing `Pending` line means execution was interrupted (spec §5
/// "Disk durability"); the caller decides how to treat it.
pub fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, FileMoverError> {
    let file = File::open(path).map_err(|e| FileMoverError::io(path.to_path_buf(), e))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FileMoverError::io(path.to_path_buf(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        if idx == 0 {
            // header line, not a JournalEntry
            continue;
        }
        let entry: JournalEntry =
            serde_json::from_str(&line).map_err(FileMoverError::ConfigParse)?;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn header_plus_two_lines_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        let journal = JournalWriter::create(&path).unwrap();

        journal
            .attempt("C:\\src\\a".into(), "C:\\out\\a".into(), OpKind::Move)
            .unwrap();
        journal
            .commit(
                "C:\\src\\a".into(),
                "C:\\out\\a".into(),
                OpKind::Move,
                JournalResult::Ok,
                None,
            )
            .unwrap();

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].result, JournalResult::Pending);
        assert_eq!(entries[1].result, JournalResult::Ok);
    }

    #[test]
    fn pending_tail_is_preserved_on_interrupted_execution() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        let journal = JournalWriter::create(&path).unwrap();
        journal
            .attempt("C:\\src\\a".into(), "C:\\out\\a".into(), OpKind::Move)
            .unwrap();
        drop(journal);

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, JournalResult::Pending);
    }
}
