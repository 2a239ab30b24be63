// scan/mod.rs
//! Scanner (spec §4.3): enumerates roots in parallel, consults the
//! Matcher for each directory visited, and yields a finite, unordered
//! stream of [`FolderHit`] records over a bounded channel.

pub mod size;

use crate::error::FileMoverError;
use crate::model::{FolderHit, ScanOptions, Warning};
use crate::normalize::{normalize, NormalizeFlags};
use crate::pattern::{CompiledRuleSet, MatchVerdict};
use crate::windows;
use crossbeam_channel::{bounded, Receiver};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Always-excluded prefixes applied when `system_protections` is on
/// (spec §6 "System protections").
fn system_protected_prefixes() -> Vec<PathBuf> {
    let mut prefixes = vec![
        PathBuf::from("C:\\Windows"),
        PathBuf::from("C:\\Program Files"),
        PathBuf::from("C:\\Program Files (x86)"),
    ];
    if let Ok(temp) = std::env::var("TEMP") {
        prefixes.push(PathBuf::from(temp));
    }
    prefixes
}

fn is_recycle_bin(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.eq_ignore_ascii_case("$Recycle.Bin"))
            .unwrap_or(false)
    })
}

fn is_protected(path: &Path, extra_prefixes: &[PathBuf]) -> bool {
    if is_recycle_bin(path) {
        return true;
    }
    system_protected_prefixes()
        .iter()
        .chain(extra_prefixes.iter())
        .any(|p| path.starts_with(p))
}

/// A handle to a running scan. Dropping or calling [`ScanHandle::cancel`]
/// stops new directories from being scheduled; in-flight directory reads
/// finish normally, mirroring the executor's cancellation semantics
/// (spec §5 "A single cancellation token is shared across workers").
pub struct ScanHandle {
    receiver: Receiver<FolderHit>,
    cancel: Arc<AtomicBool>,
}

impl ScanHandle {
    pub fn iter(&self) -> impl Iterator<Item = FolderHit> + '_ {
        self.receiver.iter()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// Walks every root in `roots` breadth-first with a work-stealing pool
/// sized `min(8, cpu_count)` (overridable via `opts.parallel_threads`),
/// consulting `rules` for each directory visited, and returns a handle
/// whose channel yields hits as they're produced.
pub fn scan(
    roots: &[PathBuf],
    rules: Arc<CompiledRuleSet>,
    opts: ScanOptions,
) -> Result<ScanHandle, FileMoverError> {
    for root in roots {
        if !root.exists() {
            return Err(FileMoverError::MissingRoot(root.clone()));
        }
    }

    let threads = opts
        .parallel_threads
        .unwrap_or_else(|| std::cmp::min(8, num_cpus()));
    let (tx, rx) = bounded::<FolderHit>(1024);
    let cancel = Arc::new(AtomicBool::new(false));
    let flags = NormalizeFlags::from(&opts);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| FileMoverError::InvalidRule {
            rule_id: String::new(),
            reason: format!("failed to build scan pool: {e}"),
        })?;

    let roots = roots.to_vec();
    let cancel_for_spawn = cancel.clone();
    pool.spawn(move || {
        roots.par_iter().for_each(|root| {
            walk_root(root, &rules, &opts, flags, &tx, &cancel_for_spawn);
        });
    });

    Ok(ScanHandle {
        receiver: rx,
        cancel,
    })
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Walks one root breadth-first: each level's directories are visited
/// with work-stealing parallelism (spec §4.3 "Directories are walked
/// breadth-first per root with work-stealing parallelism"), so a single
/// large root is itself spread across the pool rather than only
/// parallelizing across roots.
fn walk_root(
    root: &Path,
    rules: &CompiledRuleSet,
    opts: &ScanOptions,
    flags: NormalizeFlags,
    tx: &crossbeam_channel::Sender<FolderHit>,
    cancel: &AtomicBool,
) {
    let mut frontier = vec![root.to_path_buf()];
    let mut depth = 0usize;

    while !frontier.is_empty() {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if let Some(max_depth) = opts.max_depth {
            if depth > max_depth {
                return;
            }
        }

        let next_level: Vec<PathBuf> = frontier
            .par_iter()
            .flat_map(|dir| visit_directory(dir, rules, opts, flags, tx, cancel))
            .collect();

        frontier = next_level;
        depth += 1;
    }
}

/// Reads one directory's children, emits a hit for each matched
/// subdirectory, and returns the subdirectories that should be
/// descended into at the next BFS level. Stateless in `dir` alone
/// (ancestors are recomputed via [`Path::ancestors`]), so callers may
/// invoke it concurrently across an entire frontier level.
fn visit_directory(
    dir: &Path,
    rules: &CompiledRuleSet,
    opts: &ScanOptions,
    flags: NormalizeFlags,
    tx: &crossbeam_channel::Sender<FolderHit>,
    cancel: &AtomicBool,
) -> Vec<PathBuf> {
    let prefixed = windows::ensure_long_path_prefix(dir);
    let entries = match std::fs::read_dir(&prefixed) {
        Ok(entries) => entries,
        Err(_) => {
            emit_access_denied(tx, dir);
            return Vec::new();
        }
    };

    let mut descend = Vec::new();

    for entry in entries {
        if cancel.load(Ordering::Relaxed) {
            return descend;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        // lstat-like: a symlinked directory reports its own (non-dir)
        // file type here and is handled explicitly below rather than
        // silently followed.
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        let is_symlink = file_type.is_symlink();
        if !file_type.is_dir() && !is_symlink {
            continue;
        }
        if is_symlink && !file_type.is_dir() {
            // Resolve to see whether the target is itself a directory
            // before treating this as anything worth visiting.
            match std::fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => {}
                _ => continue,
            }
        }

        let path = windows::strip_long_path_prefix(&entry.path());

        if opts.system_protections && is_protected(&path, &[]) {
            continue;
        }
        if opts.excluded_paths.iter().any(|p| path.starts_with(p)) {
            continue;
        }

        let mut warnings = BTreeSet::new();
        let mut skip_descend = false;

        if is_symlink {
            if !opts.follow_junctions {
                skip_descend = true;
            } else {
                // Ancestors recomputed from `dir` (not carried state), so
                // this stays correct when sibling directories in the
                // same frontier level are walked on other threads.
                let ancestors: Vec<PathBuf> = dir.ancestors().map(Path::to_path_buf).collect();
                match windows::resolve_reparse_target(&path) {
                    Some(target) if windows::is_ancestor_on_stack(&target, &ancestors) => {
                        warnings.insert(Warning::Junction);
                        skip_descend = true;
                    }
                    Some(_) => {}
                    None => {
                        warnings.insert(Warning::Offline);
                        skip_descend = true;
                    }
                }
            }
        }

        if windows::is_network_path(&path) {
            warnings.insert(Warning::Offline);
        }
        if windows::display_path(&path).len() > 247 {
            warnings.insert(Warning::LongPath);
        }

        let folder_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let normalized = normalize(&folder_name, flags);

        emit_hit_if_matched(&path, &folder_name, &normalized, rules, opts, warnings, cancel, tx);

        if !skip_descend {
            descend.push(path);
        }
    }

    descend
}

/// Evaluates one directory's normalized name against `rules` and, on a
/// match, emits a [`FolderHit`]. Size is left unset unless
/// `opts.compute_sizes` is on; otherwise a caller must request it later
/// via [`hit_size`] (spec §4.3 "may be computed lazily").
fn emit_hit_if_matched(
    path: &Path,
    folder_name: &str,
    normalized: &str,
    rules: &CompiledRuleSet,
    opts: &ScanOptions,
    mut warnings: BTreeSet<Warning>,
    cancel: &AtomicBool,
    tx: &crossbeam_channel::Sender<FolderHit>,
) {
    match rules.evaluate(normalized) {
        MatchVerdict::Matched(rule_id) => {
            let dest_preview = rules.rule(&rule_id).and_then(|r| {
                crate::plan::template::expand(r, folder_name, path, chrono::Utc::now()).ok()
            });
            if let Some(dest) = &dest_preview {
                if windows::is_cross_volume(path, dest) {
                    warnings.insert(Warning::CrossVolume);
                }
            }
            let size_bytes = if opts.compute_sizes {
                size::aggregate_size(path, cancel)
            } else {
                None
            };
            let hit = FolderHit {
                source_path: path.to_path_buf(),
                folder_name: folder_name.to_string(),
                matched_rule_id: Some(rule_id),
                dest_preview,
                warnings,
                size_bytes,
            };
            let _ = tx.send(hit);
        }
        MatchVerdict::Excluded | MatchVerdict::NoRule => {
            // No hit emitted; descent continues exactly as spec §4.3
            // requires for both outcomes.
        }
    }
}

/// Computes a matched folder's size on demand, for a caller that skipped
/// eager aggregation via `ScanOptions::compute_sizes = false` (spec §4.3
/// "may be computed lazily (only when requested)").
pub fn hit_size(hit: &FolderHit, cancel: &AtomicBool) -> Option<u64> {
    size::aggregate_size(&hit.source_path, cancel)
}

fn emit_access_denied(tx: &crossbeam_channel::Sender<FolderHit>, dir: &Path) {
    let mut warnings = BTreeSet::new();
    warnings.insert(Warning::AccessDenied);
    let _ = tx.send(FolderHit {
        source_path: dir.to_path_buf(),
        folder_name: dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        matched_rule_id: None,
        dest_preview: None,
        warnings,
        size_bytes: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictPolicy, PatternKind, PatternSpec, Rule};
    use crate::pattern::PatternCache;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn glob_rule(id: &str, pattern: &str) -> Rule {
        Rule {
            id: id.into(),
            enabled: true,
            pattern: PatternSpec {
                kind: PatternKind::Glob,
                value: pattern.into(),
                is_exclude: false,
                case_insensitive: true,
            },
            dest_root: "C:\\out".into(),
            template: "{name}".into(),
            policy: ConflictPolicy::AutoRename,
            priority: 0,
            label: None,
        }
    }

    #[test]
    fn scan_emits_hit_for_matched_folder_only() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("report_q1")).unwrap();
        std::fs::create_dir(dir.path().join("downloads")).unwrap();

        let rules = Arc::new(
            CompiledRuleSet::compile(&[glob_rule("r1", "*report*")], &PatternCache::new()).unwrap(),
        );
        let handle = scan(&[dir.path().to_path_buf()], rules, ScanOptions::default()).unwrap();
        let hits: Vec<_> = handle.iter().collect();

        assert!(hits.iter().any(|h| h.folder_name == "report_q1"));
        assert!(!hits.iter().any(|h| h.folder_name == "downloads"));
    }

    #[test]
    #[cfg(unix)]
    fn symlink_loop_is_flagged_junction_and_not_descended() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let a = dir.path().join("A");
        std::fs::create_dir(&a).unwrap();
        symlink(&a, a.join("loop")).unwrap();

        let rules = Arc::new(
            CompiledRuleSet::compile(&[glob_rule("r1", "loop")], &PatternCache::new()).unwrap(),
        );
        let mut opts = ScanOptions::default();
        opts.follow_junctions = true;
        let handle = scan(&[dir.path().to_path_buf()], rules, opts).unwrap();
        let hits: Vec<_> = handle.iter().collect();

        let loop_hit = hits.iter().find(|h| h.folder_name == "loop");
        assert!(loop_hit.is_some());
        assert!(loop_hit.unwrap().warnings.contains(&Warning::Junction));
    }

    #[test]
    fn missing_root_is_an_error() {
        let rules = Arc::new(CompiledRuleSet::compile(&[], &PatternCache::new()).unwrap());
        let err = scan(
            &[PathBuf::from("Z:\\definitely\\not\\a\\real\\path")],
            rules,
            ScanOptions::default(),
        );
        assert!(err.is_err());
    }
}
