//! Database-specific rules.
//!
//! Generated defects correlate with the template that produced a database's
//! queries, so some repairs only make sense for one database. These rules are
//! held in a [`DatabaseRules`] value built from configuration and handed to the
//! engine; there is no global registry.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::scan::{self, Edit};

/// Rule declaration as written in `config.toml` under `[[database_rules.<id>]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseRuleSpec {
    /// Whole-word identifier rename outside literals and comments.
    Rename { id: String, from: String, to: String },
    /// Regex replacement. `unless` makes the rule a no-op once its target
    /// shape is already present.
    Regex {
        id: String,
        pattern: String,
        replacement: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unless: Option<String>,
    },
}

#[derive(Debug, Clone)]
enum RuleKind {
    Rename { from: String, to: String },
    Regex {
        pattern: Regex,
        replacement: String,
        unless: Option<Regex>,
    },
}

/// A compiled database-specific rule.
#[derive(Debug, Clone)]
pub struct DatabaseRule {
    pub id: String,
    kind: RuleKind,
}

impl DatabaseRule {
    pub fn rename(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: RuleKind::Rename {
                from: from.into(),
                to: to.into(),
            },
        }
    }

    pub fn regex(
        id: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
        unless: Option<&str>,
    ) -> Result<Self> {
        let id = id.into();
        let pattern =
            Regex::new(pattern).with_context(|| format!("rule {}: invalid pattern", id))?;
        let unless = unless
            .map(Regex::new)
            .transpose()
            .with_context(|| format!("rule {}: invalid unless pattern", id))?;
        Ok(Self {
            id,
            kind: RuleKind::Regex {
                pattern,
                replacement: replacement.into(),
                unless,
            },
        })
    }

    pub fn from_spec(spec: &DatabaseRuleSpec) -> Result<Self> {
        match spec {
            DatabaseRuleSpec::Rename { id, from, to } => Ok(Self::rename(id, from, to)),
            DatabaseRuleSpec::Regex {
                id,
                pattern,
                replacement,
                unless,
            } => Self::regex(id, pattern, replacement, unless.as_deref()),
        }
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            RuleKind::Rename { from, to } => format!("rename `{}` to `{}`", from, to),
            RuleKind::Regex {
                pattern,
                replacement,
                ..
            } => format!("replace /{}/ with `{}`", pattern.as_str(), replacement),
        }
    }

    pub fn apply(&self, sql: &str) -> String {
        match &self.kind {
            RuleKind::Rename { from, to } => {
                if from.eq_ignore_ascii_case(to) {
                    return sql.to_string();
                }
                let masked = scan::mask(sql);
                let edits = scan::word_occurrences(&masked, from)
                    .into_iter()
                    .map(|at| Edit::replace(at..at + from.len(), to.clone()))
                    .collect();
                scan::splice(sql, edits)
            }
            RuleKind::Regex {
                pattern,
                replacement,
                unless,
            } => {
                if unless.as_ref().is_some_and(|guard| guard.is_match(sql)) {
                    return sql.to_string();
                }
                pattern.replace_all(sql, replacement.as_str()).into_owned()
            }
        }
    }
}

/// Rules keyed by database identifier, in declaration order per database.
#[derive(Debug, Clone, Default)]
pub struct DatabaseRules {
    by_database: BTreeMap<String, Vec<DatabaseRule>>,
}

impl DatabaseRules {
    pub fn from_rules(rules: impl IntoIterator<Item = (String, DatabaseRule)>) -> Self {
        let mut by_database: BTreeMap<String, Vec<DatabaseRule>> = BTreeMap::new();
        for (database, rule) in rules {
            by_database.entry(database).or_default().push(rule);
        }
        Self { by_database }
    }

    /// Compile the `[database_rules]` section of the config.
    pub fn from_specs(specs: &BTreeMap<String, Vec<DatabaseRuleSpec>>) -> Result<Self> {
        let mut by_database = BTreeMap::new();
        for (database, declared) in specs {
            let compiled = declared
                .iter()
                .map(DatabaseRule::from_spec)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("database_rules.{}", database))?;
            by_database.insert(database.clone(), compiled);
        }
        Ok(Self { by_database })
    }

    /// Rules for `database_id`; empty for unknown databases.
    pub fn rules_for(&self, database_id: &str) -> &[DatabaseRule] {
        self.by_database
            .get(database_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.by_database.keys().map(String::as_str)
    }

    /// Apply every rule registered for `database_id`, in order. Unknown
    /// databases return the input unchanged.
    pub fn apply_database_rules(&self, database_id: &str, sql: &str) -> String {
        self.rules_for(database_id)
            .iter()
            .fold(sql.to_string(), |text, rule| rule.apply(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DatabaseRules {
        DatabaseRules::from_rules(vec![
            (
                "db-3".to_string(),
                DatabaseRule::rename("rename_parent", "parent_id", "parent_category_id"),
            ),
            (
                "db-3".to_string(),
                DatabaseRule::regex(
                    "geography_cast",
                    r"ST_DWithin\((\w+)\.location,",
                    "ST_DWithin($1.location::geography,",
                    Some(r"location::geography"),
                )
                .unwrap(),
            ),
        ])
    }

    #[test]
    fn test_unknown_database_is_noop() {
        let sql = "SELECT parent_id FROM categories";
        assert_eq!(sample().apply_database_rules("db-99", sql), sql);
    }

    #[test]
    fn test_rename_skips_literals_and_longer_words() {
        let out = sample().apply_database_rules(
            "db-3",
            "SELECT c.parent_id, 'parent_id', parent_ids FROM categories c",
        );
        assert_eq!(
            out,
            "SELECT c.parent_category_id, 'parent_id', parent_ids FROM categories c"
        );
    }

    #[test]
    fn test_regex_rule_guarded_by_unless() {
        let rules = sample();
        let once = rules.apply_database_rules("db-3", "WHERE ST_DWithin(s.location, p, 500)");
        assert_eq!(once, "WHERE ST_DWithin(s.location::geography, p, 500)");
        assert_eq!(rules.apply_database_rules("db-3", &once), once);
    }

    #[test]
    fn test_from_specs_reports_bad_pattern() {
        let mut specs = BTreeMap::new();
        specs.insert(
            "db-1".to_string(),
            vec![DatabaseRuleSpec::Regex {
                id: "broken".to_string(),
                pattern: "(".to_string(),
                replacement: String::new(),
                unless: None,
            }],
        );
        let err = DatabaseRules::from_specs(&specs).unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }
}
