//! Error message signatures.
//!
//! Grouped by category, in catalogue order. Within a category the first
//! matching signature wins. Capture groups that did not participate in a
//! match are reported as empty strings so rewrites can index them blindly.

use super::ErrorCategory;

pub struct Signature {
    pub id: &'static str,
    pub category: ErrorCategory,
    pub regex: &'static str,
}

pub static SIGNATURES: &[Signature] = &[
    // === Type mismatches ===
    Signature {
        // captures: cte, column number, anchor type, overall type
        id: "pg_recursive_cte_types",
        category: ErrorCategory::TypeMismatch,
        regex: r#"recursive query "([^"]+)" column (\d+) has type (.+?) in non-recursive term but type (.+?) overall"#,
    },
    Signature {
        // captures: function name, argument types
        id: "pg_function_signature",
        category: ErrorCategory::TypeMismatch,
        regex: r"function (\w+)\(([^)]*)\) does not exist",
    },
    Signature {
        // captures: first branch type, conflicting type
        id: "pg_case_types",
        category: ErrorCategory::TypeMismatch,
        regex: r"CASE types (.+?) and (.+?) cannot be matched",
    },
    Signature {
        id: "pg_union_types",
        category: ErrorCategory::TypeMismatch,
        regex: r"(?:UNION|INTERSECT|EXCEPT) types (.+?) and (.+?) cannot be matched",
    },
    Signature {
        // captures: left type, operator, right type
        id: "pg_operator_mismatch",
        category: ErrorCategory::TypeMismatch,
        regex: r"operator does not exist: ([\w ]+?(?:\[\])?) (=|<>|!=|<=|>=|<|>|~~|\+|-|\*|/|\|\|) ([\w ]+?(?:\[\])?)(?:\n|$)",
    },
    Signature {
        id: "sqlite_datatype_mismatch",
        category: ErrorCategory::TypeMismatch,
        regex: r"datatype mismatch",
    },
    // === Missing columns ===
    Signature {
        // captures: qualifier, column, hinted column
        id: "pg_missing_column",
        category: ErrorCategory::MissingColumn,
        regex: r#"(?s)column "?(?:(\w+)\.)?(\w+)"? does not exist(?:.*?Perhaps you meant to reference the column "(?:\w+\.)?(\w+)")?"#,
    },
    Signature {
        id: "sqlite_no_such_column",
        category: ErrorCategory::MissingColumn,
        regex: r"no such column: (?:(\w+)\.)?(\w+)",
    },
    // === Ambiguous columns ===
    Signature {
        // captures: column
        id: "pg_ambiguous_column",
        category: ErrorCategory::AmbiguousColumn,
        regex: r#"column reference "(\w+)" is ambiguous"#,
    },
    Signature {
        id: "sqlite_ambiguous_column",
        category: ErrorCategory::AmbiguousColumn,
        regex: r"ambiguous column name: (?:\w+\.)?(\w+)",
    },
    // === GROUP BY ===
    Signature {
        // captures: qualifier, column
        id: "pg_group_by",
        category: ErrorCategory::GroupByViolation,
        regex: r#"column "(?:(\w+)\.)?(\w+)" must appear in the GROUP BY clause"#,
    },
    // === Missing tables ===
    Signature {
        // captures: schema, table
        id: "pg_missing_relation",
        category: ErrorCategory::MissingTable,
        regex: r#"relation "(?:(\w+)\.)?(\w+)" does not exist"#,
    },
    Signature {
        id: "sqlite_no_such_table",
        category: ErrorCategory::MissingTable,
        regex: r"no such table: (?:(\w+)\.)?(\w+)",
    },
    // === Syntax ===
    Signature {
        // captures: offending token
        id: "pg_syntax_error",
        category: ErrorCategory::SyntaxError,
        regex: r#"syntax error at or near "([^"]*)""#,
    },
    Signature {
        id: "pg_syntax_end",
        category: ErrorCategory::SyntaxError,
        regex: r"syntax error at end of input",
    },
    Signature {
        id: "sqlite_syntax_error",
        category: ErrorCategory::SyntaxError,
        regex: r#"near "([^"]*)": syntax error"#,
    },
    Signature {
        id: "sqlite_incomplete",
        category: ErrorCategory::SyntaxError,
        regex: r"incomplete input",
    },
];
