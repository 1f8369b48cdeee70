//! Rule tables - the ordered (defect signature -> rewrite) pairs.
//!
//! Three tables live here:
//! - [`STRUCTURAL_RULES`] scan SQL text directly and need no database
//! - [`error_driven::ERROR_RULES`] consume a classified database error
//! - [`database::DatabaseRules`] target one generator template's residue
//!
//! Table order is part of the contract. Paren-collapsing and cast repairs run
//! before the CASE rules, which count parens to find block boundaries, and
//! the catch-all paren balancer runs last.
//!
//! # Example
//!
//! ```
//! use sqlrepair::rules;
//!
//! let fixed = rules::apply_all_structural_rules("SELECT CASE WHEN x > 0 THEN 1 THEN 0 END");
//! assert_eq!(fixed, "SELECT CASE WHEN x > 0 THEN 1 ELSE 0 END");
//! ```

pub mod database;
pub mod error_driven;
pub mod scan;
pub mod structural;

pub use database::{DatabaseRule, DatabaseRules};
pub use error_driven::{apply_error_fixes, ErrorFix, ErrorRule, RewriteInput, ERROR_RULES};

/// Upper bound on re-application passes for a single rule or table.
pub const CONVERGENCE_CAP: usize = 5;

/// A rule that rewrites SQL text without executing it.
#[derive(Debug, Clone, Copy)]
pub struct StructuralRule {
    pub id: &'static str,
    pub description: &'static str,
    pub rewrite: fn(&str) -> String,
}

pub static STRUCTURAL_RULES: &[StructuralRule] = &[
    StructuralRule {
        id: "collapse_repeated_semicolons",
        description: "collapse `;;` runs to a single `;`",
        rewrite: structural::collapse_repeated_semicolons,
    },
    StructuralRule {
        id: "collapse_redundant_parens",
        description: "collapse `((x))` runs to `(x)`",
        rewrite: structural::collapse_redundant_parens,
    },
    StructuralRule {
        id: "round_cast_extra_paren",
        description: "drop the cast closer in `ROUND(x::numeric), 2)`",
        rewrite: structural::round_cast_extra_paren,
    },
    StructuralRule {
        id: "round_cast_missing_paren",
        description: "close `ROUND(x::numeric, 2` before the next select item",
        rewrite: structural::round_cast_missing_paren,
    },
    StructuralRule {
        id: "dedupe_chained_casts",
        description: "collapse `::numeric::numeric` to `::numeric`",
        rewrite: structural::dedupe_chained_casts,
    },
    StructuralRule {
        id: "case_then_then_to_else",
        description: "turn a second THEN without WHEN into ELSE",
        rewrite: structural::case_then_then_to_else,
    },
    StructuralRule {
        id: "case_missing_end",
        description: "insert END for a CASE left open at the end of its select item",
        rewrite: structural::case_missing_end,
    },
    StructuralRule {
        id: "balance_parens",
        description: "drop unmatched `)` and close unclosed `(` at the end of the statement",
        rewrite: structural::balance_parens,
    },
];

/// Result of running a rewrite until it stops changing the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    pub text: String,
    /// Passes that changed the text.
    pub passes: usize,
}

/// Re-apply `rewrite` until the text is stable or `cap` passes changed it.
pub fn converge(sql: &str, rewrite: impl Fn(&str) -> String, cap: usize) -> Converged {
    let mut text = sql.to_string();
    let mut passes = 0;
    while passes < cap {
        let next = rewrite(&text);
        if next == text {
            break;
        }
        text = next;
        passes += 1;
    }
    Converged { text, passes }
}

/// Apply one structural rule with the bounded convergence loop.
pub fn apply_rule(rule: &StructuralRule, sql: &str) -> Converged {
    converge(sql, rule.rewrite, CONVERGENCE_CAP)
}

/// Output of a static repair, with the ids of every rule that changed the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFix {
    pub text: String,
    pub applied: Vec<String>,
}

impl StaticFix {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }

    fn note(&mut self, id: &str) {
        if !self.applied.iter().any(|a| a == id) {
            self.applied.push(id.to_string());
        }
    }
}

/// Run the whole structural table, in order, until a full pass changes nothing.
pub fn apply_all_structural_rules(sql: &str) -> String {
    apply_structural_rules_traced(sql).text
}

/// [`apply_all_structural_rules`], recording which rules fired.
pub fn apply_structural_rules_traced(sql: &str) -> StaticFix {
    let mut fix = StaticFix {
        text: sql.to_string(),
        applied: Vec::new(),
    };

    for _ in 0..CONVERGENCE_CAP {
        let before = fix.text.clone();
        for rule in STRUCTURAL_RULES {
            let converged = apply_rule(rule, &fix.text);
            if converged.passes > 0 {
                fix.text = converged.text;
                fix.note(rule.id);
            }
        }
        if fix.text == before {
            break;
        }
    }
    fix
}

/// Static path for one query: the structural table, then the rules registered
/// for `database_id`.
pub fn fix_static(database_id: &str, sql: &str, database_rules: &DatabaseRules) -> StaticFix {
    let mut fix = apply_structural_rules_traced(sql);
    for rule in database_rules.rules_for(database_id) {
        let next = rule.apply(&fix.text);
        if next != fix.text {
            fix.text = next;
            fix.note(&rule.id);
        }
    }
    fix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_ids_are_unique() {
        let mut ids: Vec<_> = STRUCTURAL_RULES.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), STRUCTURAL_RULES.len());
    }

    #[test]
    fn test_case_else_scenario_single_pass() {
        assert_eq!(
            apply_all_structural_rules("CASE WHEN x > 0 THEN 1 THEN 0 END"),
            "CASE WHEN x > 0 THEN 1 ELSE 0 END"
        );
    }

    #[test]
    fn test_converge_stops_at_cap() {
        let grow = |s: &str| format!("{}x", s);
        let out = converge("", grow, CONVERGENCE_CAP);
        assert_eq!(out.passes, CONVERGENCE_CAP);
        assert_eq!(out.text, "xxxxx");
    }

    #[test]
    fn test_traced_reports_rules_in_table_order() {
        let fix = apply_structural_rules_traced(
            "SELECT ((a)), CASE WHEN b THEN 1 THEN 2 END FROM t;;",
        );
        assert_eq!(fix.text, "SELECT (a), CASE WHEN b THEN 1 ELSE 2 END FROM t;");
        assert_eq!(
            fix.applied,
            vec![
                "collapse_repeated_semicolons",
                "collapse_redundant_parens",
                "case_then_then_to_else"
            ]
        );
    }

    #[test]
    fn test_clean_query_untouched() {
        let sql = "WITH s AS (SELECT id, ROUND(AVG(v)::numeric, 2) AS a FROM t GROUP BY id) SELECT * FROM s";
        let fix = apply_structural_rules_traced(sql);
        assert_eq!(fix.text, sql);
        assert!(!fix.changed());
    }

    #[test]
    fn test_fix_static_layers_database_rules() {
        let rules = DatabaseRules::from_rules(vec![(
            "db-3".to_string(),
            DatabaseRule::rename("rename_parent", "parent_id", "parent_category_id"),
        )]);
        let fix = fix_static("db-3", "SELECT ((parent_id)) FROM c", &rules);
        assert_eq!(fix.text, "SELECT (parent_category_id) FROM c");
        assert_eq!(fix.applied, vec!["collapse_redundant_parens", "rename_parent"]);

        let untouched = fix_static("db-99", "SELECT parent_id FROM c", &rules);
        assert_eq!(untouched.text, "SELECT parent_id FROM c");
    }
}
