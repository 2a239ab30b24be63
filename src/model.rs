// model.rs
//! Shared data model: the types every other module passes around.
//!
//! These mirror the core entities of the engine one-to-one: a rule set
//! compiles to a matcher, a scan produces hits, hits become plan nodes,
//! and execution produces journal entries. None of these types perform
//! I/O; they are plain data plus the invariants enumerated on each.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// How a rule's pattern is evaluated against a normalized folder name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PatternKind {
    Glob,
    Regex,
    Contains,
}

/// A compiled-once pattern attached to a [`Rule`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    pub kind: PatternKind,
    pub value: String,
    #[serde(default)]
    pub is_exclude: bool,
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Conflict-resolution policy for a matched rule's destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConflictPolicy {
    AutoRename,
    Skip,
    Overwrite,
}

/// A single user-declared rule. Priority is total; ties break by
/// declaration order (the order rules appear in the `rules` array).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pattern: PatternSpec,
    pub dest_root: PathBuf,
    pub template: String,
    pub policy: ConflictPolicy,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A named, alternate `(roots, rules, options)` triple (spec §6
/// "profiles (array of named configs)"). Selecting one by name swaps
/// out the active roots/rules/options without touching the rest of
/// the config document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub name: String,
    pub roots: Vec<PathBuf>,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub options: ScanOptions,
}

/// Flags controlling the Normalizer (spec §4.1) and the refusal rules
/// the Scanner applies while walking (spec §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanOptions {
    #[serde(default = "default_true")]
    pub normalize_unicode: bool,
    #[serde(default = "default_true")]
    pub normalize_width: bool,
    #[serde(default)]
    pub normalize_diacritics: bool,
    #[serde(default = "default_true")]
    pub normalize_case: bool,
    #[serde(default)]
    pub follow_junctions: bool,
    #[serde(default = "default_true")]
    pub system_protections: bool,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub excluded_paths: BTreeSet<PathBuf>,
    #[serde(default)]
    pub parallel_threads: Option<usize>,
    /// Whether the Scanner aggregates each matched folder's size
    /// eagerly during the walk. Off by default: size may instead be
    /// computed lazily, on request, via [`crate::scan::hit_size`] (spec
    /// §4.3 "may be computed lazily (only when requested)").
    #[serde(default)]
    pub compute_sizes: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            normalize_unicode: true,
            normalize_width: true,
            normalize_diacritics: false,
            normalize_case: true,
            follow_junctions: false,
            system_protections: true,
            max_depth: None,
            excluded_paths: BTreeSet::new(),
            parallel_threads: None,
            compute_sizes: false,
        }
    }
}

/// A non-fatal annotation attached to a hit, a plan node, or a journal
/// entry to flag something the executing code should be aware of but
/// that does not by itself block the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Warning {
    LongPath,
    AclDiffers,
    Offline,
    AccessDenied,
    Junction,
    CrossVolume,
}

/// One matched (or refused-and-annotated) folder, produced by the
/// Scanner and consumed read-only by the Planner. Immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FolderHit {
    pub source_path: PathBuf,
    pub folder_name: String,
    pub matched_rule_id: Option<String>,
    pub dest_preview: Option<PathBuf>,
    pub warnings: BTreeSet<Warning>,
    pub size_bytes: Option<u64>,
}

/// How a [`PlanNode`] will be realized by the Executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OpKind {
    Move,
    CopyDelete,
    Rename,
    Skip,
    None,
}

/// A conflict discovered by the Planner, attached to the node(s) it
/// concerns. Tagged variant, not an inheritance hierarchy (spec §9).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Conflict {
    NameExists { existing_path: PathBuf },
    CycleDetected,
    DestInsideSource,
    NoSpace { required: u64, available: u64 },
    Permission { required: String },
}

/// One node of the plan forest. Children are referenced by opaque id
/// (not owned directly) so the node map can stay acyclic-by-construction
/// and children can be materialized lazily (spec §9 "Cyclic structures").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: u64,
    pub is_dir: bool,
    pub name_before: String,
    pub path_before: PathBuf,
    pub name_after: String,
    pub path_after: PathBuf,
    pub kind: OpKind,
    pub size: Option<u64>,
    pub warnings: BTreeSet<Warning>,
    pub conflicts: Vec<Conflict>,
    pub children: Vec<u64>,
    pub rule_id: Option<String>,
    /// Set by [`crate::plan::NodeEdit::ChangePolicy`] during incremental
    /// revalidation; when present, takes precedence over the rule's own
    /// policy when conflicts are (re)detected (spec §4.4 "edits may change
    /// a node's conflict policy").
    #[serde(default)]
    pub policy_override: Option<ConflictPolicy>,
}

/// Aggregate counts surfaced alongside a [`MovePlan`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub count_dirs: u64,
    pub count_files: u64,
    pub total_bytes: Option<u64>,
    pub cross_volume: bool,
    pub conflicts: u64,
    pub warnings: u64,
}

/// The root-id list plus every node reachable from those roots, keyed by
/// opaque id. Produced by the Planner, may be edited via incremental
/// revalidation, consumed read-only by the Executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovePlan {
    pub roots: Vec<u64>,
    pub nodes: std::collections::BTreeMap<u64, PlanNode>,
    pub summary: PlanSummary,
}

impl MovePlan {
    pub fn node(&self, id: u64) -> Option<&PlanNode> {
        self.nodes.get(&id)
    }

    /// All non-root-and-non-Skip-or-None nodes, in plan order, depth-first.
    pub fn iter_actionable(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes
            .values()
            .filter(|n| !matches!(n.kind, OpKind::Skip | OpKind::None))
    }
}

/// Outcome recorded for one attempted operation (spec §3, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JournalResult {
    Pending,
    Ok,
    Skip,
    Failed,
}

/// One append-only, self-delimited journal record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub when_utc: chrono::DateTime<chrono::Utc>,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub op: OpKind,
    pub result: JournalResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Destination size/mtime captured right after a successful
    /// Move/Rename/CopyDelete, used by undo's "destination modified
    /// post-move" size+mtime heuristic (spec §4.5). `None` for
    /// directories (no single `len()`), for non-`Ok` entries, and for
    /// journals written before this field existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_mtime: Option<chrono::DateTime<chrono::Utc>>,
}

/// Overall status of a completed or interrupted execution session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ExecStatus {
    Ok,
    Partial,
    Cancelled,
    Fatal,
}

/// Summary returned by the Executor once a run finishes (spec §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecResult {
    pub status: ExecStatus,
    pub success_count: u64,
    pub skip_count: u64,
    pub failed_count: u64,
    pub bytes_processed: u64,
    pub journal_path: PathBuf,
    pub failures: Vec<(PathBuf, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_options_default_matches_spec_defaults() {
        let opts = ScanOptions::default();
        assert!(opts.system_protections);
        assert!(!opts.follow_junctions);
        assert!(opts.max_depth.is_none());
    }

    #[test]
    fn plan_iter_actionable_skips_skip_and_none() {
        let mut nodes = std::collections::BTreeMap::new();
        for (id, kind) in [(1, OpKind::Move), (2, OpKind::Skip), (3, OpKind::None)] {
            nodes.insert(
                id,
                PlanNode {
                    id,
                    is_dir: true,
                    name_before: "a".into(),
                    path_before: "C:\\a".into(),
                    name_after: "a".into(),
                    path_after: "C:\\b\\a".into(),
                    kind,
                    size: None,
                    warnings: BTreeSet::new(),
                    conflicts: vec![],
                    children: vec![],
                    rule_id: None,
                    policy_override: None,
                },
            );
        }
        let plan = MovePlan {
            roots: vec![1, 2, 3],
            nodes,
            summary: PlanSummary::default(),
        };
        let actionable: Vec<_> = plan.iter_actionable().map(|n| n.id).collect();
        assert_eq!(actionable, vec![1]);
    }
}
