// pattern/mod.rs
//! Matcher (spec §4.2): compiles a [`Rule`] slice once into a
//! [`CompiledRuleSet`] and evaluates a normalized folder name against it.

pub mod cache;

pub use cache::PatternCache;

use crate::error::FileMoverError;
use crate::model::{PatternKind, Rule};
use aho_corasick::AhoCorasick;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::RegexSet;
use std::collections::HashMap;

/// What evaluating a folder name against a [`CompiledRuleSet`] yields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchVerdict {
    Excluded,
    Matched(String),
    NoRule,
}

/// One pattern family aggregated across every rule that contributes a
/// pattern of that kind, plus the rule id each compiled slot maps back
/// to. Compiled once per rule-set load (spec §4.2 "Compilation").
struct Bundle {
    contains: Option<AhoCorasick>,
    contains_rule_ids: Vec<String>,
    glob_set: Option<GlobSet>,
    glob_rule_ids: Vec<String>,
    regex_set: Option<RegexSet>,
    regex_rule_ids: Vec<String>,
}

impl Bundle {
    fn empty() -> Self {
        Self {
            contains: None,
            contains_rule_ids: Vec::new(),
            glob_set: None,
            glob_rule_ids: Vec::new(),
            regex_set: None,
            regex_rule_ids: Vec::new(),
        }
    }

    fn build(rules: &[&Rule], cache: &PatternCache) -> Result<Self, FileMoverError> {
        let mut contains_patterns = Vec::new();
        let mut contains_rule_ids = Vec::new();
        let mut glob_builder = GlobSetBuilder::new();
        let mut glob_rule_ids = Vec::new();
        let mut regex_patterns = Vec::new();
        let mut regex_rule_ids = Vec::new();
        let mut has_glob = false;

        for rule in rules {
            match rule.pattern.kind {
                PatternKind::Contains => {
                    contains_patterns.push(normalize_pattern_case(
                        &rule.pattern.value,
                        rule.pattern.case_insensitive,
                    ));
                    contains_rule_ids.push(rule.id.clone());
                }
                PatternKind::Glob => {
                    // Route through the compiled-pattern cache first, same
                    // as the regex path below: this is what rejects an
                    // invalid glob with the offending rule id attached and
                    // reuses a prior compile across repeated rule-set loads
                    // of the same pattern, before the set is aggregated.
                    cache.get_or_compile_glob(&rule.pattern.value).map_err(|e| {
                        FileMoverError::InvalidRule {
                            rule_id: rule.id.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    let glob = Glob::new(&rule.pattern.value).map_err(FileMoverError::Glob)?;
                    glob_builder.add(glob);
                    glob_rule_ids.push(rule.id.clone());
                    has_glob = true;
                }
                PatternKind::Regex => {
                    let pat = if rule.pattern.case_insensitive {
                        format!("(?i){}", rule.pattern.value)
                    } else {
                        rule.pattern.value.clone()
                    };
                    regex_patterns.push(pat);
                    regex_rule_ids.push(rule.id.clone());
                }
            }
        }

        let contains = if contains_patterns.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::new(&contains_patterns)
                    .map_err(|e| FileMoverError::InvalidRule {
                        rule_id: contains_rule_ids.first().cloned().unwrap_or_default(),
                        reason: e.to_string(),
                    })?,
            )
        };

        let glob_set = if has_glob {
            Some(glob_builder.build().map_err(FileMoverError::Glob)?)
        } else {
            None
        };

        let regex_set = if regex_patterns.is_empty() {
            None
        } else {
            // Route each pattern through the compiled-pattern cache first:
            // this is what rejects pathologically complex regexes (and
            // reuses a prior compile across repeated rule-set loads of
            // the same rule) before the whole set is aggregated.
            for (pat, rule_id) in regex_patterns.iter().zip(regex_rule_ids.iter()) {
                cache.get_or_compile_regex(pat).map_err(|e| FileMoverError::InvalidRule {
                    rule_id: rule_id.clone(),
                    reason: e.to_string(),
                })?;
            }
            Some(RegexSet::new(&regex_patterns).map_err(FileMoverError::Regex)?)
        };

        Ok(Self {
            contains,
            contains_rule_ids,
            glob_set,
            glob_rule_ids,
            regex_set,
            regex_rule_ids,
        })
    }

    /// Rule ids that have at least one matching pattern in this bundle,
    /// probed in the fixed order (Contains, Glob, Regex) spec §4.2
    /// requires, so ties within a single-priority group resolve to
    /// whichever matcher family hit first.
    fn matches(&self, normalized_name: &str) -> Vec<(String, usize)> {
        let mut hits = Vec::new();

        if let Some(ac) = &self.contains {
            for m in ac.find_iter(normalized_name) {
                hits.push((self.contains_rule_ids[m.pattern().as_usize()].clone(), 0));
            }
        }

        if let Some(gs) = &self.glob_set {
            for idx in gs.matches(normalized_name) {
                hits.push((self.glob_rule_ids[idx].clone(), 1));
            }
        }

        if let Some(rs) = &self.regex_set {
            for idx in rs.matches(normalized_name).into_iter() {
                hits.push((self.regex_rule_ids[idx].clone(), 2));
            }
        }

        hits
    }
}

fn normalize_pattern_case(value: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

/// The compiled form of a whole rule set, ready for repeated evaluation
/// against every folder name the Scanner visits.
pub struct CompiledRuleSet {
    exclude: Bundle,
    include: Bundle,
    rules_by_id: HashMap<String, Rule>,
    priority: HashMap<String, (u32, usize)>,
}

impl CompiledRuleSet {
    /// Compiles `rules` once against a caller-owned [`PatternCache`].
    /// Invalid regex/glob at this stage fails the whole load with the
    /// offending rule id named (spec §4.2 "Errors").
    pub fn compile(rules: &[Rule], cache: &PatternCache) -> Result<Self, FileMoverError> {
        let mut seen = std::collections::HashSet::new();
        for r in rules {
            if !seen.insert(r.id.clone()) {
                return Err(FileMoverError::DuplicateRuleId(r.id.clone()));
            }
        }

        let enabled: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();
        let exclude_rules: Vec<&Rule> = enabled
            .iter()
            .filter(|r| r.pattern.is_exclude)
            .copied()
            .collect();
        let include_rules: Vec<&Rule> = enabled
            .iter()
            .filter(|r| !r.pattern.is_exclude)
            .copied()
            .collect();

        let exclude = Bundle::build(&exclude_rules, cache)?;
        let include = if include_rules.is_empty() {
            Bundle::empty()
        } else {
            Bundle::build(&include_rules, cache)?
        };

        let mut priority = HashMap::new();
        for (idx, r) in rules.iter().enumerate() {
            priority.insert(r.id.clone(), (r.priority, idx));
        }

        let rules_by_id = rules.iter().map(|r| (r.id.clone(), r.clone())).collect();

        Ok(Self {
            exclude,
            include,
            rules_by_id,
            priority,
        })
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules_by_id.get(id)
    }

    /// Evaluation order per spec §4.2: exclude bundle first, then
    /// inclusive rules in ascending priority (ties by declaration order).
    pub fn evaluate(&self, normalized_name: &str) -> MatchVerdict {
        if !self.exclude.matches(normalized_name).is_empty() {
            return MatchVerdict::Excluded;
        }

        let mut hits = self.include.matches(normalized_name);
        if hits.is_empty() {
            return MatchVerdict::NoRule;
        }

        hits.sort_by_key(|(rule_id, family_rank)| {
            let (priority, decl_order) = self.priority.get(rule_id).copied().unwrap_or((u32::MAX, usize::MAX));
            (priority, decl_order, *family_rank)
        });

        MatchVerdict::Matched(hits[0].0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictPolicy, PatternSpec};

    fn rule(id: &str, kind: PatternKind, value: &str, priority: u32, exclude: bool) -> Rule {
        Rule {
            id: id.to_string(),
            enabled: true,
            pattern: PatternSpec {
                kind,
                value: value.to_string(),
                is_exclude: exclude,
                case_insensitive: true,
            },
            dest_root: "C:\\out".into(),
            template: "{name}".into(),
            policy: ConflictPolicy::AutoRename,
            priority,
            label: None,
        }
    }

    #[test]
    fn exclude_short_circuits_inclusive_match() {
        let rules = vec![
            rule("excl", PatternKind::Contains, "temp", 0, true),
            rule("incl", PatternKind::Glob, "*temp*", 1, false),
        ];
        let set = CompiledRuleSet::compile(&rules, &PatternCache::new()).unwrap();
        assert_eq!(set.evaluate("my_temp_folder"), MatchVerdict::Excluded);
    }

    #[test]
    fn ascending_priority_wins_on_overlap() {
        let rules = vec![
            rule("low_prio", PatternKind::Glob, "*report*", 5, false),
            rule("high_prio", PatternKind::Contains, "report", 0, false),
        ];
        let set = CompiledRuleSet::compile(&rules, &PatternCache::new()).unwrap();
        assert_eq!(
            set.evaluate("report_q1"),
            MatchVerdict::Matched("high_prio".into())
        );
    }

    #[test]
    fn no_rule_when_nothing_matches() {
        let rules = vec![rule("r1", PatternKind::Glob, "*archive*", 0, false)];
        let set = CompiledRuleSet::compile(&rules, &PatternCache::new()).unwrap();
        assert_eq!(set.evaluate("downloads"), MatchVerdict::NoRule);
    }

    #[test]
    fn duplicate_rule_id_fails_compilation() {
        let rules = vec![
            rule("dup", PatternKind::Glob, "*a*", 0, false),
            rule("dup", PatternKind::Glob, "*b*", 1, false),
        ];
        assert!(CompiledRuleSet::compile(&rules, &PatternCache::new()).is_err());
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut r = rule("r1", PatternKind::Contains, "report", 0, false);
        r.enabled = false;
        let set = CompiledRuleSet::compile(&[r], &PatternCache::new()).unwrap();
        assert_eq!(set.evaluate("report_q1"), MatchVerdict::NoRule);
    }
}
