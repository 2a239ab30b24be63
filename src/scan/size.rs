// scan/size.rs
//! Lazy, cancellation-safe size aggregation for a matched folder
//! (spec §4.3 "Size aggregation ... may be computed lazily ... must be
//! cancellation-safe").

use crate::windows;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

/// Recursively sums file sizes under `root`, stopping early (and
/// returning `None`) if `cancel` flips to `true` partway through.
pub fn aggregate_size(root: &Path, cancel: &AtomicBool) -> Option<u64> {
    let prefixed = windows::ensure_long_path_prefix(root);
    let mut total = 0u64;
    for entry in WalkDir::new(&prefixed).into_iter() {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let entry = entry.ok()?;
        if entry.file_type().is_file() {
            total = total.saturating_add(entry.metadata().map(|m| m.len()).unwrap_or(0));
        }
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sums_nested_file_sizes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![0u8; 10]).unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b.txt"), vec![0u8; 20]).unwrap();

        let cancel = AtomicBool::new(false);
        assert_eq!(aggregate_size(dir.path(), &cancel), Some(30));
    }

    #[test]
    fn returns_none_when_cancelled_up_front() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(true);
        assert_eq!(aggregate_size(dir.path(), &cancel), None);
    }
}
