// exec/mod.rs
//! Executor (spec §4.5): walks a [`MovePlan`] in a safe order, performs
//! each non-Skip node as Move/CopyDelete/Rename, journals every attempt
//! before it becomes observable, retries transient failures, and
//! supports cancellation.

pub mod journal;
pub mod undo;

use crate::error::FileMoverError;
use crate::model::{ExecResult, ExecStatus, JournalResult, MovePlan, OpKind, PlanNode};
use crate::windows;
use journal::JournalWriter;
use rayon::prelude::*;
use std::collections::BTreeMap;
#[cfg(not(windows))]
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

const RETRY_BASE: Duration = Duration::from_millis(200);
const RETRY_FACTOR: u32 = 2;
const RETRY_MAX_ATTEMPTS: u32 = 5;
const RETRY_CAP: Duration = Duration::from_secs(15);

/// Shared cancellation token (spec §5 "A single cancellation token is
/// shared across workers").
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Live progress snapshot, published at most at the rate the caller
/// polls (spec §6 "a progress channel delivering Progress records at
/// ≤10 Hz").
#[derive(Clone, Debug, Default)]
pub struct Progress {
    pub completed_ops: u64,
    pub bytes_processed: u64,
    pub current_item: Option<PathBuf>,
}

/// Groups plan nodes into topologically-ordered ranks: no node in rank
/// N+1 may move into a path still occupied by a rank-N (or later)
/// node's source. Built with the indegree/BTreeMap Kahn's-algorithm
/// shape used for move-graph ordering in the reference move-operations
/// module this is grounded on.
fn build_ranks(plan: &MovePlan) -> Vec<Vec<u64>> {
    let actionable: Vec<&PlanNode> = plan.iter_actionable().collect();
    let ids: Vec<u64> = actionable.iter().map(|n| n.id).collect();

    // edge a -> b: b must run after a, because b's destination sits
    // inside a's still-occupied source.
    let mut indegree: BTreeMap<u64, u32> = ids.iter().map(|&id| (id, 0)).collect();
    let mut outgoing: BTreeMap<u64, Vec<u64>> = ids.iter().map(|&id| (id, Vec::new())).collect();

    for a in &actionable {
        for b in &actionable {
            if a.id == b.id {
                continue;
            }
            if b.path_after.starts_with(&a.path_before) {
                outgoing.get_mut(&a.id).unwrap().push(b.id);
                *indegree.get_mut(&b.id).unwrap() += 1;
            }
        }
    }

    let mut ranks = Vec::new();
    let mut remaining = indegree.clone();
    let mut scheduled = 0usize;

    while scheduled < ids.len() {
        let mut rank: Vec<u64> = remaining
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        if rank.is_empty() {
            // A residual cycle slipped past the planner; schedule
            // whatever's left in id order rather than deadlock.
            rank = remaining.keys().copied().collect();
        }

        // Larger nodes first within a rank to front-load long ops.
        rank.sort_by(|a, b| {
            let sa = plan.nodes[a].size.unwrap_or(0);
            let sb = plan.nodes[b].size.unwrap_or(0);
            sb.cmp(&sa).then_with(|| a.cmp(b))
        });

        for id in &rank {
            remaining.remove(id);
            for &next in outgoing.get(id).map(|v| v.as_slice()).unwrap_or(&[]) {
                if let Some(deg) = remaining.get_mut(&next) {
                    *deg = deg.saturating_sub(1);
                }
            }
        }

        scheduled += rank.len();
        ranks.push(rank);
    }

    ranks
}

/// Runs `plan` to completion (or cancellation), journaling every
/// attempted operation to `journal_path`.
#[instrument(skip(plan, journal_path, cancel, progress_cb))]
pub fn execute(
    plan: &MovePlan,
    journal_path: impl Into<PathBuf>,
    parallel_threads: usize,
    cancel: CancelToken,
    mut progress_cb: impl FnMut(Progress) + Send,
) -> Result<ExecResult, FileMoverError> {
    let journal = Arc::new(JournalWriter::create(journal_path)?);
    let ranks = build_ranks(plan);

    let completed = Arc::new(AtomicU64::new(0));
    let skipped = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    let failures: Arc<parking_lot::Mutex<Vec<(PathBuf, String)>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    // Set only when the journal itself could not be written — a stronger
    // condition than an operation failing, since at that point the run's
    // own record of what happened is no longer trustworthy (spec §7
    // "Fatal only when the journal cannot be written").
    let journal_fatal = Arc::new(AtomicBool::new(false));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel_threads.max(1))
        .build()
        .map_err(|e| FileMoverError::JournalFatal(e.to_string()))?;

    let mut cancelled_mid_run = false;

    for rank in &ranks {
        if cancel.is_cancelled() {
            cancelled_mid_run = true;
            break;
        }
        if journal_fatal.load(Ordering::Relaxed) {
            break;
        }

        let nodes: Vec<&PlanNode> = rank.iter().map(|id| &plan.nodes[id]).collect();

        pool.install(|| {
            nodes.par_iter().for_each(|node| {
                if cancel.is_cancelled() || journal_fatal.load(Ordering::Relaxed) {
                    return;
                }
                let outcome = execute_node(node, &journal);
                match outcome {
                    NodeOutcome::Ok(size) => {
                        completed.fetch_add(1, Ordering::Relaxed);
                        bytes.fetch_add(size, Ordering::Relaxed);
                        info!(path = %node.path_before.display(), "move committed");
                    }
                    NodeOutcome::Skipped => {
                        skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    NodeOutcome::Failed(msg) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        failures.lock().push((node.path_before.clone(), msg.clone()));
                        error!(path = %node.path_before.display(), error = %msg, "move failed");
                    }
                    NodeOutcome::JournalFatal(msg) => {
                        // Deliberately not counted in completed/failed: no
                        // journal line was durably written for this node,
                        // so it can't be attributed to either count (spec
                        // §8 "count of result=Ok lines equals
                        // success_count" and the Failed equivalent).
                        journal_fatal.store(true, Ordering::Relaxed);
                        failures.lock().push((node.path_before.clone(), msg.clone()));
                        error!(path = %node.path_before.display(), error = %msg, "journal write failed, aborting run");
                    }
                }
            });
        });

        progress_cb(Progress {
            completed_ops: completed.load(Ordering::Relaxed),
            bytes_processed: bytes.load(Ordering::Relaxed),
            current_item: None,
        });
    }

    let failed_count = failed.load(Ordering::Relaxed);
    let status = if journal_fatal.load(Ordering::Relaxed) {
        ExecStatus::Fatal
    } else if cancelled_mid_run {
        ExecStatus::Cancelled
    } else if failed_count == 0 {
        ExecStatus::Ok
    } else {
        ExecStatus::Partial
    };

    Ok(ExecResult {
        status,
        success_count: completed.load(Ordering::Relaxed),
        skip_count: skipped.load(Ordering::Relaxed),
        failed_count,
        bytes_processed: bytes.load(Ordering::Relaxed),
        journal_path: journal.path().to_path_buf(),
        failures: failures.lock().clone(),
    })
}

enum NodeOutcome {
    Ok(u64),
    Skipped,
    Failed(String),
    /// The journal itself could not be written — distinct from an
    /// operation failing, and never counted as Ok or Failed (no line was
    /// durably recorded for this node).
    JournalFatal(String),
}

fn execute_node(node: &PlanNode, journal: &JournalWriter) -> NodeOutcome {
    if node.kind == OpKind::Skip {
        return match journal.commit(
            node.path_before.clone(),
            node.path_after.clone(),
            node.kind,
            JournalResult::Skip,
            None,
        ) {
            Ok(()) => NodeOutcome::Skipped,
            Err(e) => NodeOutcome::JournalFatal(format!("journal write failed for skip: {e}")),
        };
    }

    if let Err(e) = journal.attempt(node.path_before.clone(), node.path_after.clone(), node.kind) {
        return NodeOutcome::JournalFatal(format!("journal attempt write failed: {e}"));
    }

    let mut attempt = 0u32;
    let mut delay = RETRY_BASE;
    loop {
        attempt += 1;
        match apply_op(node) {
            Ok(()) => {
                return match journal.commit(
                    node.path_before.clone(),
                    node.path_after.clone(),
                    node.kind,
                    JournalResult::Ok,
                    None,
                ) {
                    Ok(()) => NodeOutcome::Ok(node.size.unwrap_or(0)),
                    Err(e) => NodeOutcome::JournalFatal(format!(
                        "journal commit failed after a completed move: {e}"
                    )),
                };
            }
            Err(err) if err.is_retryable() && attempt < RETRY_MAX_ATTEMPTS && delay < RETRY_CAP => {
                warn!(path = %node.path_before.display(), attempt, "transient failure, retrying");
                std::thread::sleep(delay);
                delay = (delay * RETRY_FACTOR).min(RETRY_CAP);
                continue;
            }
            Err(err) => {
                let message = err.to_string();
                return match journal.commit(
                    node.path_before.clone(),
                    node.path_after.clone(),
                    node.kind,
                    JournalResult::Failed,
                    Some(message.clone()),
                ) {
                    Ok(()) => NodeOutcome::Failed(message),
                    Err(e) => {
                        NodeOutcome::JournalFatal(format!("journal commit failed for a failed move: {e}"))
                    }
                };
            }
        }
    }
}

fn apply_op(node: &PlanNode) -> Result<(), FileMoverError> {
    match node.kind {
        OpKind::Move | OpKind::Rename => {
            if let Some(parent) = node.path_after.parent() {
                std::fs::create_dir_all(parent).map_err(|e| FileMoverError::io(parent, e))?;
            }
            shell_move(&node.path_before, &node.path_after)
                .map_err(|e| classify_io_error(&node.path_before, e))
        }
        OpKind::CopyDelete => {
            if let Some(parent) = node.path_after.parent() {
                std::fs::create_dir_all(parent).map_err(|e| FileMoverError::io(parent, e))?;
            }
            shell_copy(&node.path_before, &node.path_after)
                .map_err(|e| classify_io_error(&node.path_before, e))?;
            shell_delete(&node.path_before).map_err(|e| classify_io_error(&node.path_before, e))
        }
        OpKind::Skip | OpKind::None => Ok(()),
    }
}

/// Moves `from` to `to` through the platform shell's file-operation API
/// where available (spec §4.5 step 2: ACL preservation, timestamp
/// preservation, allow-undo registration), falling back to a plain
/// rename on platforms without one.
#[cfg(windows)]
fn shell_move(from: &Path, to: &Path) -> std::io::Result<()> {
    let from = windows::ensure_long_path_prefix(from);
    let to = windows::ensure_long_path_prefix(to);
    windows::shell_file_op(windows::ShellOp::Move, &from, Some(&to))
}

#[cfg(not(windows))]
fn shell_move(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::rename(from, to)
}

#[cfg(windows)]
fn shell_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    let from = windows::ensure_long_path_prefix(from);
    let to = windows::ensure_long_path_prefix(to);
    windows::shell_file_op(windows::ShellOp::Copy, &from, Some(&to))
}

#[cfg(not(windows))]
fn shell_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    copy_dir_recursive_raw(from, to)
}

#[cfg(windows)]
fn shell_delete(path: &Path) -> std::io::Result<()> {
    let path = windows::ensure_long_path_prefix(path);
    windows::shell_file_op(windows::ShellOp::Delete, &path, None)
}

#[cfg(not(windows))]
fn shell_delete(path: &Path) -> std::io::Result<()> {
    std::fs::remove_dir_all(path)
}

fn classify_io_error(path: &Path, e: std::io::Error) -> FileMoverError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::PermissionDenied => FileMoverError::AccessDenied(path.to_path_buf()),
        ErrorKind::WouldBlock => FileMoverError::SharingViolation(path.to_path_buf()),
        // A reparse'd OneDrive/network placeholder not yet hydrated, or a
        // share that dropped mid-operation — both are spec §7 "Transient"
        // and worth the executor's retry-with-backoff rather than failing
        // the node outright.
        ErrorKind::TimedOut | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
            FileMoverError::NetworkHiccup(path.to_path_buf())
        }
        _ if windows::is_network_path(path) => FileMoverError::Offline(path.to_path_buf()),
        _ => FileMoverError::io(path, e),
    }
}

/// Plain-stdlib recursive copy, used directly on platforms with no
/// shell file-operation API and as the non-Windows fallback for
/// [`shell_copy`].
#[cfg(not(windows))]
fn copy_dir_recursive_raw(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    let mut queue = VecDeque::new();
    queue.push_back((src.to_path_buf(), dst.to_path_buf()));

    while let Some((s, d)) = queue.pop_front() {
        for entry in std::fs::read_dir(&s)? {
            let entry = entry?;
            let target = d.join(entry.file_name());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                std::fs::create_dir_all(&target)?;
                queue.push_back((entry.path(), target));
            } else {
                std::fs::copy(entry.path(), &target)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlanSummary;
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::tempdir;

    fn node(id: u64, path_before: &Path, path_after: &Path, kind: OpKind) -> PlanNode {
        PlanNode {
            id,
            is_dir: true,
            name_before: path_before.file_name().unwrap().to_string_lossy().to_string(),
            path_before: path_before.to_path_buf(),
            name_after: path_after.file_name().unwrap().to_string_lossy().to_string(),
            path_after: path_after.to_path_buf(),
            kind,
            size: Some(0),
            warnings: BTreeSet::new(),
            conflicts: vec![],
            children: vec![],
            rule_id: None,
            policy_override: None,
        }
    }

    #[test]
    fn simple_move_executes_and_journals() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("report_q1");
        std::fs::create_dir(&src).unwrap();
        let dest = dir.path().join("out").join("report_q1");

        let mut nodes = BTreeMap::new();
        nodes.insert(1, node(1, &src, &dest, OpKind::Move));
        let plan = MovePlan {
            roots: vec![1],
            nodes,
            summary: PlanSummary::default(),
        };

        let journal_path = dir.path().join("j.jsonl");
        let result = execute(&plan, &journal_path, 2, CancelToken::new(), |_| {}).unwrap();

        assert_eq!(result.status, ExecStatus::Ok);
        assert_eq!(result.success_count, 1);
        assert!(dest.exists());
        assert!(!src.exists());

        let entries = journal::read_entries(&journal_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].result, JournalResult::Ok);
    }

    #[test]
    fn skip_node_is_journaled_without_mutation() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("A");
        std::fs::create_dir(&src).unwrap();
        let dest = src.join("sub").join("A");

        let mut nodes = BTreeMap::new();
        nodes.insert(1, node(1, &src, &dest, OpKind::Skip));
        let plan = MovePlan {
            roots: vec![1],
            nodes,
            summary: PlanSummary::default(),
        };

        let journal_path = dir.path().join("j.jsonl");
        let result = execute(&plan, &journal_path, 1, CancelToken::new(), |_| {}).unwrap();

        assert_eq!(result.status, ExecStatus::Ok);
        assert_eq!(result.skip_count, 1);
        assert!(src.exists());
    }

    #[test]
    fn ranks_order_parent_before_child_destination() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("A");
        let b = dir.path().join("B");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        // b moves into a spot currently occupied by a's source.
        let mut nodes = BTreeMap::new();
        nodes.insert(1, node(1, &a, &dir.path().join("elsewhere").join("A"), OpKind::Move));
        nodes.insert(2, node(2, &b, &a.join("nested").join("B"), OpKind::Move));
        let plan = MovePlan {
            roots: vec![1, 2],
            nodes,
            summary: PlanSummary::default(),
        };

        let ranks = build_ranks(&plan);
        let rank_of = |id: u64| ranks.iter().position(|r| r.contains(&id)).unwrap();
        assert!(rank_of(1) < rank_of(2));
    }
}
