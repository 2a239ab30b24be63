// config.rs
//! Configuration loading (spec §6 "Config JSON"). Resolution order
//! mirrors the layered precedence of the storage-ballast config loader
//! this is grounded on: explicit path, then an environment variable,
//! then an OS-conventional default, with strict unknown-field rejection
//! throughout so a typo'd rule field fails fast instead of silently
//! defaulting.

use crate::error::FileMoverError;
use crate::model::{Profile, Rule, ScanOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "FILEMOVER_CONFIG";

/// Top-level configuration document (spec §6 config JSON shape).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub roots: Vec<PathBuf>,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub options: ScanOptions,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Config {
    /// `%APPDATA%\FileMover\config.json`, falling back to a relative
    /// path when `%APPDATA%` is unset (non-Windows test runs).
    pub fn default_path() -> PathBuf {
        match std::env::var_os("APPDATA") {
            Some(appdata) => PathBuf::from(appdata).join("FileMover").join("config.json"),
            None => PathBuf::from("FileMover").join("config.json"),
        }
    }

    /// Resolution order: explicit `path`, then `FILEMOVER_CONFIG`, then
    /// [`Config::default_path`]. A missing file at an explicit or
    /// env-resolved path is an error; a missing file at the default
    /// path is not (an empty, rule-less config is returned instead).
    pub fn load(path: Option<&Path>) -> Result<Self, FileMoverError> {
        let env_path = if path.is_none() {
            std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from)
        } else {
            None
        };
        let is_explicit = path.is_some() || env_path.is_some();
        let effective = path
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(Self::default_path);

        let cfg = if effective.exists() {
            let raw = fs::read_to_string(&effective).map_err(|e| FileMoverError::io(&effective, e))?;
            serde_json::from_str::<Self>(&raw)?
        } else if is_explicit {
            return Err(FileMoverError::io(
                &effective,
                std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
            ));
        } else {
            Self {
                roots: Vec::new(),
                rules: Vec::new(),
                options: ScanOptions::default(),
                profiles: Vec::new(),
            }
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Swaps the active `roots`/`rules`/`options` for the named profile's,
    /// leaving the rest of the document (and the profile list itself)
    /// untouched.
    pub fn with_profile(&self, name: &str) -> Result<Self, FileMoverError> {
        let profile = self
            .profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| FileMoverError::MissingRoot(PathBuf::from(name)))?;
        let mut cfg = self.clone();
        cfg.roots = profile.roots.clone();
        cfg.rules = profile.rules.clone();
        cfg.options = profile.options.clone();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<(), FileMoverError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FileMoverError::io(parent, e))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).map_err(|e| FileMoverError::io(path, e))
    }

    /// Structural checks the JSON schema can't express: unique rule
    /// ids, existing roots, and every rule's template referencing only
    /// known tokens (spec §3 invariants, §6.3 template grammar).
    pub fn validate(&self) -> Result<(), FileMoverError> {
        if self.roots.is_empty() {
            return Err(FileMoverError::MissingRoot(PathBuf::new()));
        }

        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.clone()) {
                return Err(FileMoverError::DuplicateRuleId(rule.id.clone()));
            }
            crate::plan::template::validate(&rule.template)?;
        }

        let mut profile_names = BTreeSet::new();
        for profile in &self.profiles {
            if !profile_names.insert(profile.name.clone()) {
                return Err(FileMoverError::DuplicateRuleId(profile.name.clone()));
            }
            let mut profile_rule_ids = BTreeSet::new();
            for rule in &profile.rules {
                if !profile_rule_ids.insert(rule.id.clone()) {
                    return Err(FileMoverError::DuplicateRuleId(rule.id.clone()));
                }
                crate::plan::template::validate(&rule.template)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictPolicy, PatternKind, PatternSpec};
    use tempfile::tempdir;

    fn sample_rule(id: &str) -> Rule {
        Rule {
            id: id.to_string(),
            enabled: true,
            pattern: PatternSpec {
                kind: PatternKind::Glob,
                value: "*.tmp".into(),
                is_exclude: false,
                case_insensitive: true,
            },
            dest_root: PathBuf::from("C:\\Archive"),
            template: "{name}".into(),
            policy: ConflictPolicy::AutoRename,
            priority: 0,
            label: None,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = Config {
            roots: vec![dir.path().to_path_buf()],
            rules: vec![sample_rule("r1")],
            options: ScanOptions::default(),
            profiles: Vec::new(),
        };
        cfg.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.rules.len(), 1);
        assert_eq!(loaded.rules[0].id, "r1");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = Config::load(Some(Path::new("Z:\\nope\\config.json")));
        assert!(err.is_err());
    }

    #[test]
    fn duplicate_rule_ids_fail_validation() {
        let dir = tempdir().unwrap();
        let cfg = Config {
            roots: vec![dir.path().to_path_buf()],
            rules: vec![sample_rule("dup"), sample_rule("dup")],
            options: ScanOptions::default(),
            profiles: Vec::new(),
        };
        assert!(matches!(
            cfg.validate(),
            Err(FileMoverError::DuplicateRuleId(_))
        ));
    }

    #[test]
    fn unknown_json_field_is_rejected() {
        let raw = r#"{"roots":["C:\\x"],"rules":[],"options":{},"bogus":true}"#;
        let err = serde_json::from_str::<Config>(raw).unwrap_err();
        assert!(err.to_string().contains("bogus") || err.to_string().contains("unknown"));
    }

    #[test]
    fn profile_swaps_roots_rules_and_options() {
        let dir = tempdir().unwrap();
        let base_root = dir.path().join("base");
        let alt_root = dir.path().join("alt");
        std::fs::create_dir_all(&base_root).unwrap();
        std::fs::create_dir_all(&alt_root).unwrap();

        let cfg = Config {
            roots: vec![base_root.clone()],
            rules: vec![sample_rule("base-rule")],
            options: ScanOptions::default(),
            profiles: vec![crate::model::Profile {
                name: "alt".into(),
                roots: vec![alt_root.clone()],
                rules: vec![sample_rule("alt-rule")],
                options: ScanOptions::default(),
            }],
        };

        let swapped = cfg.with_profile("alt").unwrap();
        assert_eq!(swapped.roots, vec![alt_root]);
        assert_eq!(swapped.rules[0].id, "alt-rule");
        assert!(cfg.with_profile("missing").is_err());
    }

    #[test]
    fn duplicate_profile_names_fail_validation() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let profile = |n: &str| crate::model::Profile {
            name: n.to_string(),
            roots: vec![root.clone()],
            rules: Vec::new(),
            options: ScanOptions::default(),
        };
        let cfg = Config {
            roots: vec![root.clone()],
            rules: Vec::new(),
            options: ScanOptions::default(),
            profiles: vec![profile("dup"), profile("dup")],
        };
        assert!(matches!(
            cfg.validate(),
            Err(FileMoverError::DuplicateRuleId(_))
        ));
    }
}
