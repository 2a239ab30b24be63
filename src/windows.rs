// windows.rs
//! Platform layer: long-path prefixing, reparse-point resolution, and
//! free-space queries (spec §4.3, §4.4 NoSpace conflict).

use std::path::{Path, PathBuf};

/// Ensures a path carries the `\\?\` long-path prefix. Every internal
/// path operation uses the prefixed form; the prefix is stripped again
/// by [`display_path`] before a path reaches a hit or plan node (spec
/// §4.3 "the prefix never appears in FolderHit.path").
#[cfg(windows)]
pub fn ensure_long_path_prefix(p: &Path) -> PathBuf {
    let s = p.to_string_lossy();
    if s.starts_with("\\\\?\\") {
        return p.to_path_buf();
    }
    let mut pref = String::from("\\\\?\\");
    pref.push_str(&s);
    PathBuf::from(pref)
}

#[cfg(not(windows))]
pub fn ensure_long_path_prefix(p: &Path) -> PathBuf {
    p.to_path_buf()
}

/// Strips a `\\?\` prefix if present, for display and for populating
/// hit/plan-node path fields.
pub fn display_path(p: &Path) -> String {
    let s = p.to_string_lossy();
    s.strip_prefix("\\\\?\\")
        .map(|s| s.to_string())
        .unwrap_or_else(|| s.to_string())
}

/// [`display_path`] as a [`PathBuf`], for call sites that walked a
/// prefixed root (e.g. the Scanner) and need the stripped form back as
/// a path rather than a display string.
pub fn strip_long_path_prefix(p: &Path) -> PathBuf {
    PathBuf::from(display_path(p))
}

/// Follows a reparse point (junction or symlink) to its canonical
/// target. Returns `None` if the target cannot be resolved (an Offline
/// warning is appropriate in that case). The result is stripped of any
/// long-path prefix so it compares cleanly against the (also stripped)
/// paths on the walk stack, even though `canonicalize` on Windows always
/// returns a `\\?\`-prefixed path.
pub fn resolve_reparse_target(p: &Path) -> Option<PathBuf> {
    std::fs::read_link(p)
        .ok()
        .or_else(|| std::fs::canonicalize(p).ok())
        .map(|t| strip_long_path_prefix(&t))
}

/// True if `target` is an ancestor directory already present on
/// `stack` — following it further would re-enter a cycle (spec §4.3
/// "aborts descent if the target is an ancestor already on the walk
/// stack").
pub fn is_ancestor_on_stack(target: &Path, stack: &[PathBuf]) -> bool {
    stack.iter().any(|p| p == target || target.starts_with(p))
}

/// Queries free space on the volume containing `path` (spec §4.4
/// NoSpace conflict). On non-Windows platforms (used only by this
/// workspace's tests) falls back to a conservative "unknown" `None`.
#[cfg(windows)]
#[allow(unsafe_code)]
pub fn free_space_bytes(path: &Path) -> Option<u64> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    let root = volume_root(path)?;
    let wide: Vec<u16> = root
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let mut free_available: u64 = 0;
    // SAFETY: `wide` is a NUL-terminated UTF-16 buffer alive for the
    // call; the out-pointer addresses a live local of the right size.
    let ok = unsafe {
        GetDiskFreeSpaceExW(
            wide.as_ptr(),
            &mut free_available,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };

    if ok == 0 {
        None
    } else {
        Some(free_available)
    }
}

#[cfg(not(windows))]
pub fn free_space_bytes(path: &Path) -> Option<u64> {
    let _ = path;
    None
}

/// Which shell file operation [`shell_file_op`] performs (spec §4.5
/// step 2: "the OS operation (shell file-operation API) with flags for
/// ACL preservation, timestamp preservation, and allow-undo
/// registration with the platform undo stack").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellOp {
    Move,
    Copy,
    Delete,
}

/// Performs a move/copy/delete through the Windows shell's file
/// operation API rather than raw `CreateFile`/`MoveFile` calls. Unlike
/// `std::fs::rename`, this preserves ACLs and timestamps the way
/// Explorer does and registers the operation with the platform's own
/// undo stack (Ctrl+Z in Explorer can undo it, independent of this
/// crate's own journal-based undo).
#[cfg(windows)]
#[allow(unsafe_code)]
pub fn shell_file_op(op: ShellOp, from: &Path, to: Option<&Path>) -> std::io::Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::UI::Shell::{
        SHFileOperationW, FOF_ALLOWUNDO, FOF_NOCONFIRMATION, FOF_NOERRORUI, FOF_SILENT,
        FO_COPY, FO_DELETE, FO_MOVE, SHFILEOPSTRUCTW,
    };

    // SHFILEOPSTRUCTW wants `pFrom`/`pTo` as a list of paths terminated
    // by a *double* NUL; we only ever pass one path per list, so a
    // single extra NUL after the string suffices.
    fn double_null(p: &Path) -> Vec<u16> {
        p.as_os_str().encode_wide().chain([0, 0]).collect()
    }

    let from_buf = double_null(from);
    let to_buf = to.map(double_null);

    // Zero-initialized is a valid starting state for every field here:
    // a null hwnd (no owning window), null progress title, and no name
    // mappings are all documented-valid inputs for a silent operation.
    let mut shfo: SHFILEOPSTRUCTW = unsafe { std::mem::zeroed() };
    shfo.wFunc = match op {
        ShellOp::Move => FO_MOVE as _,
        ShellOp::Copy => FO_COPY as _,
        ShellOp::Delete => FO_DELETE as _,
    };
    shfo.pFrom = from_buf.as_ptr();
    shfo.pTo = to_buf.as_ref().map(|b| b.as_ptr()).unwrap_or(std::ptr::null());
    shfo.fFlags = (FOF_ALLOWUNDO | FOF_NOCONFIRMATION | FOF_NOERRORUI | FOF_SILENT) as _;

    // SAFETY: `from_buf`/`to_buf` are double-NUL-terminated UTF-16
    // buffers kept alive until after the call; `shfo` is a live local
    // passed by exclusive pointer, matching SHFileOperationW's contract.
    let code = unsafe { SHFileOperationW(&mut shfo) };

    if code != 0 || shfo.fAnyOperationsAborted != 0 {
        return Err(std::io::Error::other(format!(
            "SHFileOperationW failed with code {code}"
        )));
    }
    Ok(())
}

/// The drive-root (`C:\`) a path resides on, used as the free-space
/// query unit and to decide whether two paths are cross-volume.
pub fn volume_root(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(std::path::Component::Prefix(prefix)) => {
            let mut root = PathBuf::from(prefix.as_os_str());
            root.push("\\");
            Some(root)
        }
        _ => None,
    }
}

/// True when `a` and `b` resolve to different volume roots.
pub fn is_cross_volume(a: &Path, b: &Path) -> bool {
    match (volume_root(a), volume_root(b)) {
        (Some(ra), Some(rb)) => ra != rb,
        _ => false,
    }
}

/// True for a UNC path (`\\server\share\...`), the only portable signal
/// this workspace has for "might be a network location" (spec §4.3
/// Warning::Offline "the containing location is a network/offline
/// path"). Checked on the raw string form so it works the same whether
/// or not the `\\?\` long-path prefix is present.
pub fn is_network_path(path: &Path) -> bool {
    let s = display_path(path);
    s.starts_with("\\\\") || s.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_path_strips_prefix() {
        assert_eq!(display_path(Path::new("\\\\?\\C:\\a\\b")), "C:\\a\\b");
        assert_eq!(display_path(Path::new("C:\\a\\b")), "C:\\a\\b");
    }

    #[test]
    fn ancestor_on_stack_detects_self_containment() {
        let stack = vec![PathBuf::from("C:\\A"), PathBuf::from("C:\\A\\sub")];
        assert!(is_ancestor_on_stack(Path::new("C:\\A\\sub\\deeper"), &stack));
        assert!(!is_ancestor_on_stack(Path::new("C:\\B"), &stack));
    }

    #[test]
    fn network_path_is_detected_by_unc_prefix() {
        assert!(is_network_path(Path::new("\\\\server\\share\\folder")));
        assert!(!is_network_path(Path::new("C:\\a\\b")));
    }
}
