// cli/mod.rs
//! Command-line surface: the file-based JSON pipeline of spec §6 — each
//! subcommand reads its input from a file (or stdin's worth of config)
//! and writes its output to a file or stdout, so any stage can be
//! inspected or hand-edited before the next one runs. `apply` is its
//! own explicit subcommand that consumes a plan file directly, never
//! rebuilding silently from config, so a plan edited between `plan` and
//! `apply` (spec §4.4 "Incremental revalidation") is what actually runs.

use crate::config::Config;
use crate::error::FileMoverError;
use crate::exec::{self, CancelToken};
use crate::model::{ExecStatus, FolderHit, MovePlan, Rule};
use crate::pattern::{CompiledRuleSet, PatternCache};
use crate::plan::{self, PlanOptions};
use crate::scan;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "filemover", version, about = "Reorganize directory trees by matching folder names against rules")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk `--roots` using the rules in `--config`, printing the
    /// resulting hits as a JSON array on stdout.
    Scan {
        #[arg(long = "roots", value_name = "PATH", num_args = 1.., required = true)]
        roots: Vec<PathBuf>,
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
    /// Build a move plan from a hits file and a rules file, writing the
    /// plan as JSON to `--output`.
    Plan {
        #[arg(long = "input", value_name = "PATH")]
        input: PathBuf,
        #[arg(long, value_name = "PATH")]
        rules: PathBuf,
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Simulate a plan file without touching the filesystem, printing a
    /// SimReport as JSON on stdout.
    DryRun {
        #[arg(long, value_name = "PATH")]
        plan: PathBuf,
    },
    /// Execute a plan file, journaling every operation.
    Apply {
        #[arg(long, value_name = "PATH")]
        plan: PathBuf,
        #[arg(long, value_name = "PATH")]
        journal: PathBuf,
    },
    /// Reverse a previously written journal.
    Undo {
        #[arg(long, value_name = "PATH")]
        journal: PathBuf,
    },
}

/// Exit codes the binary maps `run`'s result onto (spec §6.4).
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const INPUT_ERROR: i32 = 2;
    pub const PARTIAL: i32 = 3;
    pub const CANCELLED: i32 = 4;
    pub const FATAL_IO: i32 = 5;
}

/// Classifies a top-level error for the exit-code contract (spec §6.4):
/// malformed config/rules are an input error, everything else that
/// escapes the pipeline (journal unwritable, scan pool failed to spawn)
/// is treated as I/O-fatal.
pub fn exit_code_for_error(err: &FileMoverError) -> i32 {
    match err {
        FileMoverError::InvalidRule { .. }
        | FileMoverError::DuplicateRuleId(_)
        | FileMoverError::MissingRoot(_)
        | FileMoverError::ConfigParse(_)
        | FileMoverError::UnknownToken(_)
        | FileMoverError::Glob(_)
        | FileMoverError::Regex(_) => exit_code::INPUT_ERROR,
        FileMoverError::Cancelled => exit_code::CANCELLED,
        _ => exit_code::FATAL_IO,
    }
}

pub fn run(cli: &Cli) -> Result<i32, FileMoverError> {
    match &cli.command {
        Command::Scan { roots, config, profile } => cmd_scan(roots, config, profile.as_deref()),
        Command::Plan { input, rules, output } => cmd_plan(input, rules, output),
        Command::DryRun { plan } => cmd_dry_run(plan),
        Command::Apply { plan, journal } => cmd_apply(plan, journal),
        Command::Undo { journal } => cmd_undo(journal),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T, FileMoverError> {
    let text = std::fs::read_to_string(path).map_err(|e| FileMoverError::io(path, e))?;
    serde_json::from_str(&text).map_err(FileMoverError::ConfigParse)
}

fn write_json<T: serde::Serialize>(path: &std::path::Path, value: &T) -> Result<(), FileMoverError> {
    let file = File::create(path).map_err(|e| FileMoverError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(FileMoverError::ConfigParse)?;
    writer.flush().map_err(|e| FileMoverError::io(path, e))
}

fn cmd_scan(roots: &[PathBuf], config_path: &std::path::Path, profile: Option<&str>) -> Result<i32, FileMoverError> {
    let cfg = Config::load(Some(config_path))?;
    let cfg = match profile {
        Some(name) => cfg.with_profile(name)?,
        None => cfg,
    };
    let compiled = CompiledRuleSet::compile(&cfg.rules, &PatternCache::new())?;
    let handle = scan::scan(roots, Arc::new(compiled), cfg.options.clone())?;
    let hits: Vec<FolderHit> = handle.iter().collect();

    for hit in &hits {
        if let Some(rule_id) = &hit.matched_rule_id {
            info!(path = %hit.source_path.display(), rule = %rule_id, "matched");
        }
    }

    let stdout = std::io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &hits).map_err(FileMoverError::ConfigParse)?;
    println!();
    Ok(exit_code::SUCCESS)
}

fn cmd_plan(input: &std::path::Path, rules_path: &std::path::Path, output: &std::path::Path) -> Result<i32, FileMoverError> {
    let hits: Vec<FolderHit> = read_json(input)?;
    let rules: Vec<Rule> = read_json(rules_path)?;
    let rules_by_id: BTreeMap<String, Rule> = rules.iter().map(|r| (r.id.clone(), r.clone())).collect();

    let plan = plan::build_plan(&hits, &rules_by_id, &PlanOptions::default())?;
    write_json(output, &plan)?;

    println!(
        "{} dirs, {} conflicts, {} warnings -> {}",
        plan.summary.count_dirs,
        plan.summary.conflicts,
        plan.summary.warnings,
        output.display()
    );
    Ok(exit_code::SUCCESS)
}

fn cmd_dry_run(plan_path: &std::path::Path) -> Result<i32, FileMoverError> {
    let plan: MovePlan = read_json(plan_path)?;
    let report = plan::simulate(&plan);

    let stdout = std::io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &report).map_err(FileMoverError::ConfigParse)?;
    println!();
    Ok(exit_code::SUCCESS)
}

fn cmd_apply(plan_path: &std::path::Path, journal_path: &std::path::Path) -> Result<i32, FileMoverError> {
    let plan: MovePlan = read_json(plan_path)?;
    let result = exec::execute(&plan, journal_path.to_path_buf(), 4, CancelToken::new(), |_| {})?;

    println!(
        "{:?}: {} ok, {} skipped, {} failed",
        result.status, result.success_count, result.skip_count, result.failed_count
    );
    for (path, reason) in &result.failures {
        eprintln!("FAILED {}: {reason}", path.display());
    }

    Ok(match result.status {
        ExecStatus::Ok => exit_code::SUCCESS,
        ExecStatus::Partial => exit_code::PARTIAL,
        ExecStatus::Cancelled => exit_code::CANCELLED,
        ExecStatus::Fatal => exit_code::FATAL_IO,
    })
}

fn cmd_undo(journal: &std::path::Path) -> Result<i32, FileMoverError> {
    let result = exec::undo::undo(journal)?;
    println!("{} restored, {} failed", result.restored, result.failures.len());
    for failure in &result.failures {
        eprintln!(
            "FAILED to restore {} -> {}: {}",
            failure.dest.display(),
            failure.source.display(),
            failure.reason
        );
    }
    Ok(if result.failures.is_empty() {
        exit_code::SUCCESS
    } else {
        exit_code::PARTIAL
    })
}
