// exec/undo.rs
//! Undo: replays a completed journal in reverse, applying the inverse of
//! each committed operation (spec §4.5 "Undo", §6 journal format).

use crate::error::FileMoverError;
use crate::model::{JournalEntry, JournalResult, OpKind};
use std::path::Path;
use tracing::{info, warn};

/// One entry's undo outcome, collected without stopping the whole pass
/// (spec §4.5 "undo is all-or-attempt, not all-or-nothing": a single
/// un-restorable entry is reported, not fatal to the rest).
#[derive(Debug, Clone)]
pub struct UndoFailure {
    pub source: std::path::PathBuf,
    pub dest: std::path::PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct UndoResult {
    pub restored: u64,
    pub failures: Vec<UndoFailure>,
}

/// Reads the journal at `path` and reverses every `Ok` entry, most
/// recent first. `Pending` entries (an interrupted run) and `Skip`
/// entries (nothing moved) are left alone.
pub fn undo(path: &Path) -> Result<UndoResult, FileMoverError> {
    let entries = super::journal::read_entries(path)?;
    let mut result = UndoResult::default();

    for entry in entries.iter().rev().filter(|e| e.result == JournalResult::Ok) {
        match invert(entry) {
            Ok(()) => {
                result.restored += 1;
                info!(source = %entry.source.display(), dest = %entry.dest.display(), "restored");
            }
            Err(err) => {
                warn!(source = %entry.source.display(), error = %err, "undo failed for entry");
                result.failures.push(UndoFailure {
                    source: entry.source.clone(),
                    dest: entry.dest.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(result)
}

fn invert(entry: &JournalEntry) -> Result<(), FileMoverError> {
    if !entry.dest.exists() {
        return Err(FileMoverError::MissingDestination(entry.dest.clone()));
    }
    if dest_was_modified_post_move(entry)? {
        return Err(FileMoverError::ModifiedPostMove(entry.dest.clone()));
    }

    match entry.op {
        OpKind::Move | OpKind::Rename => {
            if entry.source.exists() {
                return Err(FileMoverError::ModifiedPostMove(entry.dest.clone()));
            }
            if let Some(parent) = entry.source.parent() {
                std::fs::create_dir_all(parent).map_err(|e| FileMoverError::io(parent, e))?;
            }
            std::fs::rename(&entry.dest, &entry.source)
                .map_err(|e| FileMoverError::io(&entry.dest, e))
        }
        OpKind::CopyDelete => {
            if entry.source.exists() {
                return Err(FileMoverError::ModifiedPostMove(entry.dest.clone()));
            }
            copy_back(&entry.dest, &entry.source)?;
            std::fs::remove_dir_all(&entry.dest).map_err(|e| FileMoverError::io(&entry.dest, e))
        }
        OpKind::Skip | OpKind::None => Ok(()),
    }
}

/// Compares the destination's current size/mtime against what
/// [`super::journal::JournalWriter::commit`] captured right after the
/// move (spec §4.5 "destination modified post-move detected by size+
/// mtime heuristic"). Entries journaled before this field existed carry
/// no recorded values, so the heuristic has nothing to compare against
/// and reports "unmodified" rather than blocking undo on old journals.
fn dest_was_modified_post_move(entry: &JournalEntry) -> Result<bool, FileMoverError> {
    let meta =
        std::fs::metadata(&entry.dest).map_err(|e| FileMoverError::io(&entry.dest, e))?;

    if let Some(expected_size) = entry.dest_size {
        if meta.is_file() && meta.len() != expected_size {
            return Ok(true);
        }
    }

    if let Some(expected_mtime) = entry.dest_mtime {
        if let Ok(actual) = meta.modified() {
            let actual: chrono::DateTime<chrono::Utc> = actual.into();
            // Filesystem mtime resolution is often coarser than chrono's;
            // a sub-second skew is noise, not evidence of a real edit.
            let drift_ms = (actual - expected_mtime).num_milliseconds().abs();
            if drift_ms > 1000 {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

fn copy_back(dest: &Path, source: &Path) -> Result<(), FileMoverError> {
    std::fs::create_dir_all(source).map_err(|e| FileMoverError::io(source, e))?;
    let mut stack = vec![(dest.to_path_buf(), source.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        for entry in std::fs::read_dir(&from).map_err(|e| FileMoverError::io(&from, e))? {
            let entry = entry.map_err(|e| FileMoverError::io(&from, e))?;
            let target = to.join(entry.file_name());
            let file_type = entry.file_type().map_err(|e| FileMoverError::io(&from, e))?;
            if file_type.is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| FileMoverError::io(&target, e))?;
                stack.push((entry.path(), target));
            } else {
                std::fs::copy(entry.path(), &target)
                    .map_err(|e| FileMoverError::io(&target, e))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::journal::JournalWriter;
    use tempfile::tempdir;

    #[test]
    fn stale_recorded_mtime_blocks_undo() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("old_name");
        let dst = dir.path().join("new_name");
        std::fs::create_dir(&dst).unwrap();

        // A fabricated commit-time mtime far from the directory's real
        // one stands in for "something touched dest after the move" -
        // the same signal a real edit would leave.
        let entry = JournalEntry {
            when_utc: chrono::Utc::now(),
            source: src,
            dest: dst,
            op: OpKind::Rename,
            result: JournalResult::Ok,
            message: None,
            dest_size: None,
            dest_mtime: Some(chrono::Utc::now() - chrono::Duration::days(1)),
        };

        let err = invert(&entry).unwrap_err();
        assert!(matches!(err, FileMoverError::ModifiedPostMove(_)));
    }

    #[test]
    fn rename_is_reversed() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("old_name");
        let dst = dir.path().join("new_name");
        std::fs::create_dir(&dst).unwrap();

        let journal_path = dir.path().join("j.jsonl");
        let writer = JournalWriter::create(&journal_path).unwrap();
        writer
            .commit(
                src.clone(),
                dst.clone(),
                OpKind::Rename,
                JournalResult::Ok,
                None,
            )
            .unwrap();
        drop(writer);

        let result = undo(&journal_path).unwrap();
        assert_eq!(result.restored, 1);
        assert!(result.failures.is_empty());
        assert!(src.exists());
        assert!(!dst.exists());
    }

    #[test]
    fn missing_destination_is_reported_not_fatal() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("old_name");
        let dst = dir.path().join("gone");

        let journal_path = dir.path().join("j.jsonl");
        let writer = JournalWriter::create(&journal_path).unwrap();
        writer
            .commit(
                src.clone(),
                dst.clone(),
                OpKind::Rename,
                JournalResult::Ok,
                None,
            )
            .unwrap();
        drop(writer);

        let result = undo(&journal_path).unwrap();
        assert_eq!(result.restored, 0);
        assert_eq!(result.failures.len(), 1);
    }

    #[test]
    fn pending_and_skip_entries_are_not_reversed() {
        let dir = tempdir().unwrap();
        let journal_path = dir.path().join("j.jsonl");
        let writer = JournalWriter::create(&journal_path).unwrap();
        writer
            .attempt(dir.path().join("a"), dir.path().join("b"), OpKind::Move)
            .unwrap();
        writer
            .commit(
                dir.path().join("c"),
                dir.path().join("d"),
                OpKind::Skip,
                JournalResult::Skip,
                None,
            )
            .unwrap();
        drop(writer);

        let result = undo(&journal_path).unwrap();
        assert_eq!(result.restored, 0);
        assert!(result.failures.is_empty());
    }
}
