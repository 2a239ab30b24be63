// lib.rs
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod model;
pub mod normalize;
pub mod pattern;
pub mod plan;
pub mod scan;
pub mod windows;

pub use crate::config::Config;
pub use crate::error::FileMoverError;
pub use crate::exec::{CancelToken, Progress};
pub use crate::model::{ExecResult, ExecStatus, FolderHit, MovePlan};
pub use crate::pattern::{CompiledRuleSet, PatternCache};

use std::sync::Arc;

/// Facade over the engine pipeline: compile rules once, scan, build a
/// plan, then either execute it or walk away. Each stage is also usable
/// on its own (the CLI calls them directly); this exists for embedders
/// who want the whole thing in three calls.
pub struct FileMover {
    rules: Arc<CompiledRuleSet>,
    config: Config,
    /// Owned by this `FileMover`, not global: compiling the same rule
    /// set twice (e.g. `reload`) reuses it instead of reaching through
    /// process-wide state (spec §9).
    pattern_cache: PatternCache,
}

impl FileMover {
    /// Compiles `config.rules` once; subsequent scans reuse the same
    /// compiled matcher.
    pub fn new(config: Config) -> Result<Self, FileMoverError> {
        let pattern_cache = PatternCache::new();
        let rules = Arc::new(CompiledRuleSet::compile(&config.rules, &pattern_cache)?);
        Ok(Self {
            rules,
            config,
            pattern_cache,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The compiled-pattern cache backing this instance's rule set,
    /// exposed so an embedder recompiling rules (e.g. after an edit) can
    /// reuse it instead of starting a fresh cache every time.
    pub fn pattern_cache(&self) -> &PatternCache {
        &self.pattern_cache
    }

    /// Walks the configured roots and returns every hit the Scanner
    /// produced (matched folders plus access-denied annotations).
    pub fn scan(&self) -> Result<Vec<FolderHit>, FileMoverError> {
        let handle = scan::scan(
            &self.config.roots,
            Arc::clone(&self.rules),
            self.config.options.clone(),
        )?;
        Ok(handle.iter().collect())
    }

    /// Scans then builds a plan in one call.
    pub fn plan(&self) -> Result<MovePlan, FileMoverError> {
        let hits = self.scan()?;
        let rules_by_id = self
            .config
            .rules
            .iter()
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        plan::build_plan(&hits, &rules_by_id, &plan::PlanOptions::default())
    }

    /// Builds and immediately executes a plan, journaling to
    /// `journal_path`.
    pub fn apply(
        &self,
        journal_path: impl Into<std::path::PathBuf>,
        cancel: CancelToken,
    ) -> Result<ExecResult, FileMoverError> {
        let plan = self.plan()?;
        let parallel = self.config.options.parallel_threads.unwrap_or(4);
        exec::execute(&plan, journal_path, parallel, cancel, |_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictPolicy, PatternKind, PatternSpec, Rule, ScanOptions};
    use tempfile::tempdir;

    #[test]
    fn facade_scans_plans_and_applies() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("report_q1");
        std::fs::create_dir(&src).unwrap();
        let dest_root = dir.path().join("out");

        let config = Config {
            roots: vec![dir.path().to_path_buf()],
            rules: vec![Rule {
                id: "r1".into(),
                enabled: true,
                pattern: PatternSpec {
                    kind: PatternKind::Glob,
                    value: "*report*".into(),
                    is_exclude: false,
                    case_insensitive: true,
                },
                dest_root: dest_root.clone(),
                template: "{name}".into(),
                policy: ConflictPolicy::AutoRename,
                priority: 0,
                label: None,
            }],
            options: ScanOptions::default(),
            profiles: Vec::new(),
        };

        let mover = FileMover::new(config).unwrap();
        let hits = mover.scan().unwrap();
        assert!(hits.iter().any(|h| h.folder_name == "report_q1"));

        let plan = mover.plan().unwrap();
        assert_eq!(plan.iter_actionable().count(), 1);

        let journal_path = dir.path().join("journal.jsonl");
        let result = mover.apply(&journal_path, CancelToken::new()).unwrap();
        assert_eq!(result.status, ExecStatus::Ok);
        assert!(dest_root.join("report_q1").exists());
    }
}
