// plan/mod.rs
//! Planner (spec §4.4): expands destination templates, classifies each
//! hit's operation, detects conflicts, and assembles a [`MovePlan`].
//! Single-threaded by design (spec §5); incremental revalidation runs
//! on the caller's thread and touches only the affected subtree.

pub mod template;

use crate::error::FileMoverError;
use crate::model::{
    Conflict, ConflictPolicy, FolderHit, MovePlan, OpKind, PlanNode, PlanSummary, Rule, Warning,
};
use crate::windows;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Options that shape plan construction but aren't per-rule data.
#[derive(Clone, Debug)]
pub struct PlanOptions {
    pub enable_cross_volume: bool,
    /// Frozen plan-creation timestamp; the same value is used for every
    /// node's template expansion so a rebuild from the same hit list is
    /// byte-identical modulo node ids (spec §4.4 "Determinism").
    pub created_at: DateTime<Utc>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            enable_cross_volume: false,
            created_at: Utc::now(),
        }
    }
}

/// Builds a [`MovePlan`] from the selected hits and rule set.
///
/// Hits without a `matched_rule_id` are ignored — they exist in the
/// scan result for annotation purposes (e.g. AccessDenied) but never
/// become plan nodes.
pub fn build_plan(
    hits: &[FolderHit],
    rules_by_id: &BTreeMap<String, Rule>,
    opts: &PlanOptions,
) -> Result<MovePlan, FileMoverError> {
    // Deterministic ordering regardless of scan parallelism (spec §5).
    let mut selected: Vec<&FolderHit> = hits
        .iter()
        .filter(|h| h.matched_rule_id.is_some())
        .collect();
    selected.sort_by(|a, b| {
        let pa = a
            .matched_rule_id
            .as_ref()
            .and_then(|id| rules_by_id.get(id))
            .map(|r| r.priority)
            .unwrap_or(u32::MAX);
        let pb = b
            .matched_rule_id
            .as_ref()
            .and_then(|id| rules_by_id.get(id))
            .map(|r| r.priority)
            .unwrap_or(u32::MAX);
        pa.cmp(&pb).then_with(|| a.source_path.cmp(&b.source_path))
    });

    let mut nodes = BTreeMap::new();
    let mut next_id: u64 = 1;
    let mut roots = Vec::new();

    for hit in &selected {
        let rule_id = hit.matched_rule_id.clone().unwrap();
        let rule = rules_by_id
            .get(&rule_id)
            .ok_or_else(|| FileMoverError::InvalidRule {
                rule_id: rule_id.clone(),
                reason: "rule referenced by hit not found in rule set".into(),
            })?;

        let path_after = template::expand(rule, &hit.folder_name, &hit.source_path, opts.created_at)?;
        let node_id = next_id;
        next_id += 1;

        let kind = classify(&hit.source_path, &path_after, opts.enable_cross_volume);

        let node = PlanNode {
            id: node_id,
            is_dir: true,
            name_before: hit.folder_name.clone(),
            path_before: hit.source_path.clone(),
            name_after: path_after
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| hit.folder_name.clone()),
            path_after,
            kind,
            size: hit.size_bytes,
            warnings: hit.warnings.clone(),
            conflicts: Vec::new(),
            children: Vec::new(),
            rule_id: Some(rule_id),
            policy_override: None,
        };

        roots.push(node_id);
        nodes.insert(node_id, node);
    }

    detect_conflicts(&mut nodes, &roots, rules_by_id);

    let summary = summarize(&nodes);
    Ok(MovePlan {
        roots,
        nodes,
        summary,
    })
}

/// Operation classification (spec §4.4).
fn classify(source: &Path, dest: &Path, enable_cross_volume: bool) -> OpKind {
    let same_parent = source.parent() == dest.parent();
    let same_name = source.file_name() == dest.file_name();

    if same_parent && !same_name {
        return OpKind::Rename;
    }
    if !windows::is_cross_volume(source, dest) {
        return OpKind::Move;
    }
    if enable_cross_volume {
        OpKind::CopyDelete
    } else {
        OpKind::Skip
    }
}

fn detect_conflicts(
    nodes: &mut BTreeMap<u64, PlanNode>,
    roots: &[u64],
    rules_by_id: &BTreeMap<String, Rule>,
) {
    // DestInsideSource: unresolvable, mandatory Skip.
    for id in roots {
        let node = nodes.get_mut(id).unwrap();
        if node.kind == OpKind::Skip {
            continue;
        }
        if node.path_after.starts_with(&node.path_before) {
            node.conflicts.push(Conflict::DestInsideSource);
            node.kind = OpKind::Skip;
        }
    }

    // CycleDetected: A.after under B.before AND B.after under A.before.
    let mut cyclic = BTreeSet::new();
    for i in 0..roots.len() {
        for j in (i + 1)..roots.len() {
            let (a_id, b_id) = (roots[i], roots[j]);
            let a = &nodes[&a_id];
            let b = &nodes[&b_id];
            if a.path_after.starts_with(&b.path_before) && b.path_after.starts_with(&a.path_before)
            {
                cyclic.insert(a_id);
                cyclic.insert(b_id);
            }
        }
    }
    for id in &cyclic {
        let node = nodes.get_mut(id).unwrap();
        node.conflicts.push(Conflict::CycleDetected);
        node.kind = OpKind::Skip;
    }

    // NameExists: resolved per the matched rule's policy.
    let mut occupied: BTreeSet<PathBuf> = BTreeSet::new();
    for id in roots {
        let node = nodes.get(id).unwrap();
        if node.kind != OpKind::Skip {
            // Anything already on disk (other than the node's own source)
            // counts as occupied from the start.
            if node.path_after.exists() && node.path_after != node.path_before {
                occupied.insert(node.path_after.clone());
            }
        }
    }

    for id in roots {
        // An edit-time override (spec §4.4 "edits may change a node's
        // conflict policy") wins over the rule's own policy.
        let policy = nodes[id].policy_override.unwrap_or_else(|| {
            nodes[id]
                .rule_id
                .as_ref()
                .and_then(|rid| rules_by_id.get(rid))
                .map(|r| r.policy)
                .unwrap_or(ConflictPolicy::Skip)
        });

        let node = nodes.get_mut(id).unwrap();
        if node.kind == OpKind::Skip {
            continue;
        }

        let is_occupied_by_other = node.path_after.exists() && node.path_after != node.path_before;
        let occupied_by_sibling = occupied.contains(&node.path_after)
            && !(node.path_after.exists() && node.path_after == node.path_before);

        if !is_occupied_by_other && !occupied_by_sibling {
            // No conflict, but this destination is now spoken for: a
            // later sibling that templates to the same not-yet-existing
            // path must still see it as occupied.
            occupied.insert(node.path_after.clone());
            continue;
        }

        node.conflicts.push(Conflict::NameExists {
            existing_path: node.path_after.clone(),
        });

        match policy {
            ConflictPolicy::Skip => node.kind = OpKind::Skip,
            ConflictPolicy::Overwrite => {
                // Name kept; caller is expected to surface the
                // NameExists conflict as requiring acknowledgement.
                occupied.insert(node.path_after.clone());
            }
            ConflictPolicy::AutoRename => {
                let renamed = auto_rename(&node.path_after, &occupied);
                occupied.insert(renamed.clone());
                node.name_after = renamed
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or(node.name_after.clone());
                node.path_after = renamed;
            }
        }
    }

    // NoSpace: only for CopyDelete nodes, aggregated per destination
    // volume (spec §4.4 "CopyDelete only, since intra-volume Move does
    // not consume bytes").
    let mut required_by_volume: BTreeMap<PathBuf, u64> = BTreeMap::new();
    for id in roots {
        let node = &nodes[id];
        if node.kind != OpKind::CopyDelete {
            continue;
        }
        if let Some(volume) = windows::volume_root(&node.path_after) {
            *required_by_volume.entry(volume).or_insert(0) += node.size.unwrap_or(0);
        }
    }
    for (volume, required) in &required_by_volume {
        let available = windows::free_space_bytes(volume).unwrap_or(u64::MAX);
        if *required > available {
            for id in roots {
                let node = nodes.get_mut(id).unwrap();
                if node.kind == OpKind::CopyDelete
                    && windows::volume_root(&node.path_after).as_ref() == Some(volume)
                {
                    node.conflicts.push(Conflict::NoSpace {
                        required: *required,
                        available,
                    });
                }
            }
        }
    }

    // Permission: a cheap, non-fatal heuristic from a readonly-bit probe.
    for id in roots {
        let node = nodes.get_mut(id).unwrap();
        if node.kind == OpKind::Skip {
            continue;
        }
        if let Ok(meta) = std::fs::symlink_metadata(&node.path_before) {
            if meta.permissions().readonly() {
                node.conflicts.push(Conflict::Permission {
                    required: "write".into(),
                });
                node.warnings.insert(Warning::AclDiffers);
            }
        }
    }
}

/// Appends a disambiguating suffix (" (2)", " (3)", …) to `path` until
/// it names something not already occupied on disk or in `occupied`
/// (spec §4.4 AutoRename, §8 "given N existing siblings ... N+1").
fn auto_rename(path: &Path, occupied: &BTreeSet<PathBuf>) -> PathBuf {
    if !path.exists() && !occupied.contains(path) {
        return path.to_path_buf();
    }
    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut n = 2u32;
    loop {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() && !occupied.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn summarize(nodes: &BTreeMap<u64, PlanNode>) -> PlanSummary {
    let mut summary = PlanSummary::default();
    let mut total_bytes = 0u64;
    let mut has_bytes = false;

    for node in nodes.values() {
        summary.count_dirs += 1;
        if let Some(size) = node.size {
            total_bytes += size;
            has_bytes = true;
        }
        if node.kind == OpKind::CopyDelete {
            summary.cross_volume = true;
        }
        summary.conflicts += node.conflicts.len() as u64;
        summary.warnings += node.warnings.len() as u64;
    }

    summary.total_bytes = has_bytes.then_some(total_bytes);
    summary
}

/// Assumed steady-state throughput for a CopyDelete node, used only to
/// produce a rough duration estimate for [`simulate`]. Move/Rename don't
/// copy bytes, so they cost a fixed per-node constant instead.
const ASSUMED_COPY_THROUGHPUT_BYTES_PER_SEC: f64 = 100.0 * 1024.0 * 1024.0;
const PER_NODE_OVERHEAD_SECS: f64 = 0.05;

/// A dry-run report (spec glossary "Dry-run: simulation of a plan
/// without mutation, producing estimates of duration, required
/// permissions, and unresolved conflicts").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimReport {
    pub estimated_duration_secs: f64,
    pub requires_permission_ack: bool,
    pub unresolved_conflicts: u64,
    pub summary: PlanSummary,
}

/// Builds a [`SimReport`] for `plan` without touching the filesystem.
pub fn simulate(plan: &MovePlan) -> SimReport {
    let mut duration = 0.0;
    let mut unresolved = 0u64;
    let mut requires_ack = false;

    for node in plan.iter_actionable() {
        duration += PER_NODE_OVERHEAD_SECS;
        if node.kind == OpKind::CopyDelete {
            duration += node.size.unwrap_or(0) as f64 / ASSUMED_COPY_THROUGHPUT_BYTES_PER_SEC;
        }
        if !node.conflicts.is_empty() {
            unresolved += 1;
        }
        if node
            .conflicts
            .iter()
            .any(|c| matches!(c, Conflict::Permission { .. }))
        {
            requires_ack = true;
        }
    }

    SimReport {
        estimated_duration_secs: duration,
        requires_permission_ack: requires_ack,
        unresolved_conflicts: unresolved,
        summary: plan.summary.clone(),
    }
}

/// One requested edit to an existing plan node (spec §4.4 "Incremental
/// revalidation").
#[derive(Clone, Debug)]
pub enum NodeEdit {
    SetSkip,
    ChangePolicy(ConflictPolicy),
    Rename(String),
    Exclude,
}

/// The set of nodes whose conflict set or op-kind changed as a result
/// of an edit, plus the updated summary.
#[derive(Clone, Debug)]
pub struct ValidationDelta {
    pub changed_node_ids: Vec<u64>,
    pub summary: PlanSummary,
}

/// Applies `edit` to `node_id` and re-runs conflict detection only over
/// the edited node's subtree and any node whose `path_after` shares a
/// prefix with the edited node's `path_after` (spec §4.4).
pub fn revalidate(
    plan: &mut MovePlan,
    node_id: u64,
    edit: NodeEdit,
    rules_by_id: &BTreeMap<String, Rule>,
) -> Result<ValidationDelta, FileMoverError> {
    let edited_path_after = plan
        .nodes
        .get(&node_id)
        .ok_or_else(|| FileMoverError::InvalidRule {
            rule_id: node_id.to_string(),
            reason: "no such plan node".into(),
        })?
        .path_after
        .clone();

    {
        let node = plan.nodes.get_mut(&node_id).unwrap();
        match edit {
            NodeEdit::SetSkip | NodeEdit::Exclude => node.kind = OpKind::Skip,
            NodeEdit::ChangePolicy(new_policy) => {
                // A prior conflict-driven Skip must not stick around under
                // the new policy; re-derive the structural kind (allowing
                // cross-volume so this never spuriously produces Skip) and
                // let detect_conflicts below decide if it Skips again.
                node.kind = classify(&node.path_before, &node.path_after, true);
                node.policy_override = Some(new_policy);
            }
            NodeEdit::Rename(new_name) => {
                node.name_after = new_name.clone();
                node.path_after = node.path_after.with_file_name(new_name);
            }
        }
    }

    let affected: Vec<u64> = plan
        .nodes
        .values()
        .filter(|n| {
            n.id == node_id
                || n.path_before.starts_with(&plan.nodes[&node_id].path_before)
                || n.path_after.starts_with(&edited_path_after)
                || edited_path_after.starts_with(&n.path_after)
        })
        .map(|n| n.id)
        .collect();

    // detect_conflicts recomputes every root node's conflicts from
    // scratch on every call (it doesn't know which nodes are "affected"),
    // so every node's Vec must start empty here or an unaffected node
    // whose conflict predicate still holds accumulates a duplicate entry
    // each time revalidate runs.
    for node in plan.nodes.values_mut() {
        node.conflicts.clear();
    }

    detect_conflicts(&mut plan.nodes, &plan.roots, rules_by_id);
    plan.summary = summarize(&plan.nodes);

    Ok(ValidationDelta {
        changed_node_ids: affected,
        summary: plan.summary.clone(),
    })
}

/// Materializes one level of `node_id`'s subtree into fresh [`PlanNode`]s
/// (spec §4.4 "children can be materialized lazily"), wiring their ids
/// into `node_id`'s `children` list. Children default to `OpKind::None`
/// (preview only, not actionable) — a deep preview never queues an
/// operation on its own; the caller must still select and revalidate a
/// child before it can execute. A no-op if the node already has children.
pub fn materialize_children(plan: &mut MovePlan, node_id: u64) -> Result<Vec<u64>, FileMoverError> {
    let node = plan
        .nodes
        .get(&node_id)
        .ok_or_else(|| FileMoverError::InvalidRule {
            rule_id: node_id.to_string(),
            reason: "no such plan node".into(),
        })?;

    if !node.children.is_empty() {
        return Ok(node.children.clone());
    }
    if !node.is_dir {
        return Ok(Vec::new());
    }

    let source = node.path_before.clone();
    let dest = node.path_after.clone();
    let rule_id = node.rule_id.clone();

    let mut next_id = plan.nodes.keys().next_back().copied().unwrap_or(0) + 1;
    let mut child_ids = Vec::new();

    let entries = std::fs::read_dir(&source).map_err(|e| FileMoverError::io(&source, e))?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let size = entry.metadata().ok().filter(|_| !is_dir).map(|m| m.len());

        let id = next_id;
        next_id += 1;
        child_ids.push(id);

        plan.nodes.insert(
            id,
            PlanNode {
                id,
                is_dir,
                name_before: name.clone(),
                path_before: entry.path(),
                name_after: name.clone(),
                path_after: dest.join(&name),
                kind: OpKind::None,
                size,
                warnings: BTreeSet::new(),
                conflicts: Vec::new(),
                children: Vec::new(),
                rule_id: rule_id.clone(),
                policy_override: None,
            },
        );
    }

    plan.nodes.get_mut(&node_id).unwrap().children = child_ids.clone();
    Ok(child_ids)
}
