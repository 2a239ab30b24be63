//! End-to-end scenarios from spec.md §8, driven through the public
//! `FileMover` facade against real temporary directory trees.

use filemover::exec::CancelToken;
use filemover::model::{ConflictPolicy, ExecStatus, PatternKind, PatternSpec, Rule, ScanOptions};
use filemover::{Config, FileMover};
use std::collections::BTreeMap;
use tempfile::tempdir;

fn report_rule(dest_root: std::path::PathBuf, policy: ConflictPolicy) -> Rule {
    Rule {
        id: "r1".into(),
        enabled: true,
        pattern: PatternSpec {
            kind: PatternKind::Glob,
            value: "*report*".into(),
            is_exclude: false,
            case_insensitive: true,
        },
        dest_root,
        template: "{name}".into(),
        policy,
        priority: 0,
        label: None,
    }
}

fn config(root: std::path::PathBuf, rule: Rule) -> Config {
    Config {
        roots: vec![root],
        rules: vec![rule],
        options: ScanOptions::default(),
        profiles: Vec::new(),
    }
}

// Scenario 1: simple move, then full undo restores the tree.
#[test]
fn simple_move_then_undo_restores_source() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("report_q1");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("notes.txt"), b"hello").unwrap();
    let dest_root = dir.path().join("out");

    let cfg = config(dir.path().to_path_buf(), report_rule(dest_root.clone(), ConflictPolicy::AutoRename));
    let mover = FileMover::new(cfg).unwrap();

    let journal_path = dir.path().join("journal.jsonl");
    let result = mover.apply(&journal_path, CancelToken::new()).unwrap();
    assert_eq!(result.status, ExecStatus::Ok);
    assert!(dest_root.join("report_q1").join("notes.txt").exists());
    assert!(!src.exists());

    let undo_result = filemover::exec::undo::undo(&journal_path).unwrap();
    assert_eq!(undo_result.restored, 1);
    assert!(undo_result.failures.is_empty());
    assert!(src.join("notes.txt").exists());
    assert!(!dest_root.join("report_q1").exists());
}

// Scenario 2: destination already occupied, AutoRename picks " (2)".
#[test]
fn autorename_resolves_name_collision() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("report_q1");
    std::fs::create_dir(&src).unwrap();
    let dest_root = dir.path().join("out");
    std::fs::create_dir_all(&dest_root).unwrap();
    std::fs::create_dir(dest_root.join("report_q1")).unwrap();

    let cfg = config(dir.path().to_path_buf(), report_rule(dest_root.clone(), ConflictPolicy::AutoRename));
    let mover = FileMover::new(cfg).unwrap();
    let plan = mover.plan().unwrap();

    let node = plan.iter_actionable().next().unwrap();
    assert_eq!(node.path_after, dest_root.join("report_q1 (2)"));
    assert!(node.conflicts.iter().any(|c| matches!(c, filemover::model::Conflict::NameExists { .. })));
}

// Scenario 3: a rule that would move a folder inside itself is skipped,
// and the skip is journaled rather than silently dropped.
#[test]
fn cycle_into_self_is_skipped_and_journaled() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("A");
    std::fs::create_dir(&a).unwrap();

    let rule = Rule {
        id: "r1".into(),
        enabled: true,
        pattern: PatternSpec {
            kind: PatternKind::Glob,
            value: "A".into(),
            is_exclude: false,
            case_insensitive: true,
        },
        dest_root: a.join("sub"),
        template: "A".into(),
        policy: ConflictPolicy::AutoRename,
        priority: 0,
        label: None,
    };
    let cfg = config(dir.path().to_path_buf(), rule);
    let mover = FileMover::new(cfg).unwrap();

    let journal_path = dir.path().join("journal.jsonl");
    let result = mover.apply(&journal_path, CancelToken::new()).unwrap();

    assert_eq!(result.status, ExecStatus::Ok);
    assert_eq!(result.skip_count, 1);
    assert!(a.exists(), "folder must not have been moved into itself");

    let entries = filemover::exec::journal::read_entries(&journal_path).unwrap();
    assert!(entries.iter().any(|e| e.result == filemover::model::JournalResult::Skip));
}

// Full round-trip through the JSON config format (spec.md §8 "Config
// JSON: load -> serialize -> load yields an equivalent rule set").
#[test]
fn config_round_trips_through_json() {
    let dir = tempdir().unwrap();
    let cfg = config(
        dir.path().to_path_buf(),
        report_rule(dir.path().join("out"), ConflictPolicy::Skip),
    );
    let path = dir.path().join("config.json");
    cfg.save(&path).unwrap();

    let reloaded = Config::load(Some(&path)).unwrap();
    assert_eq!(reloaded.rules.len(), cfg.rules.len());
    assert_eq!(reloaded.rules[0].id, cfg.rules[0].id);
    assert_eq!(reloaded.roots, cfg.roots);
}

// A rule-set-level sanity check: two plans built from the same hit
// list and rule set are identical modulo node ids (spec.md §4.4
// "Determinism").
#[test]
fn plan_is_deterministic_across_rebuilds() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("report_q1");
    std::fs::create_dir(&src).unwrap();
    let dest_root = dir.path().join("out");

    let rule = report_rule(dest_root, ConflictPolicy::AutoRename);
    let mut rules_by_id = BTreeMap::new();
    rules_by_id.insert(rule.id.clone(), rule.clone());

    let hit = filemover::model::FolderHit {
        source_path: src.clone(),
        folder_name: "report_q1".into(),
        matched_rule_id: Some("r1".into()),
        dest_preview: None,
        warnings: Default::default(),
        size_bytes: Some(0),
    };

    let opts = filemover::plan::PlanOptions::default();
    let plan_a = filemover::plan::build_plan(&[hit.clone()], &rules_by_id, &opts).unwrap();
    let plan_b = filemover::plan::build_plan(&[hit], &rules_by_id, &opts).unwrap();

    let node_a = &plan_a.nodes[&plan_a.roots[0]];
    let node_b = &plan_b.nodes[&plan_b.roots[0]];
    assert_eq!(node_a.path_after, node_b.path_after);
    assert_eq!(node_a.kind, node_b.kind);
}
