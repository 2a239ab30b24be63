// plan/template.rs
//! Destination template grammar (spec §4.4, §6): balanced `{token}`
//! substitutions with backslash-escaped literal braces.

use crate::error::FileMoverError;
use crate::model::Rule;
use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};

const KNOWN_TOKENS: &[&str] = &[
    "name", "label", "yyyy", "yyyyMM", "yyyyMMdd", "drive", "parent",
];

/// Checks every `{token}` in `template` is one of the known tokens.
/// Called once at rule-set load time so a bad template is a Config
/// error (spec §7), not a per-hit failure.
pub fn validate(template: &str) -> Result<(), FileMoverError> {
    for token in extract_tokens(template) {
        if !KNOWN_TOKENS.contains(&token.as_str()) {
            return Err(FileMoverError::UnknownToken(token));
        }
    }
    Ok(())
}

fn extract_tokens(template: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next(); // skip escaped char
            continue;
        }
        if c == '{' {
            let mut tok = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                tok.push(c2);
            }
            tokens.push(tok);
        }
    }
    tokens
}

/// Expands `rule.template` against one matched folder, producing the
/// previewed (or final, at plan-build time) destination path.
///
/// `now` is the plan-creation timestamp; passing the same value for
/// every node in a plan is what makes the planner's output
/// byte-identical across rebuilds of the same hit list (spec §4.4
/// "Determinism").
pub fn expand(
    rule: &Rule,
    folder_name: &str,
    source_path: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, FileMoverError> {
    let drive = source_path
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_default();
    let drive_letter = drive.trim_end_matches(['\\', ':']).to_string();

    let parent = source_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut out = String::new();
    let mut chars = rule.template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
            continue;
        }
        if c == '{' {
            let mut tok = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                tok.push(c2);
            }
            let replacement = match tok.as_str() {
                "name" => folder_name.to_string(),
                // Empty string when the matched rule has no label:
                // treated as a present-but-empty substitution (spec §9
                // open question, resolved in DESIGN.md).
                "label" => rule.label.clone().unwrap_or_default(),
                "yyyy" => format!("{:04}", now.year()),
                "yyyyMM" => format!("{:04}{:02}", now.year(), now.month()),
                "yyyyMMdd" => format!("{:04}{:02}{:02}", now.year(), now.month(), now.day()),
                "drive" => drive_letter.clone(),
                "parent" => parent.clone(),
                other => {
                    return Err(FileMoverError::UnknownToken(other.to_string()));
                }
            };
            out.push_str(&replacement);
        } else {
            out.push(c);
        }
    }

    Ok(rule.dest_root.join(out))
}
