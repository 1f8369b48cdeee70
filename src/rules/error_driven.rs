//! Error-driven rewrites.
//!
//! Each rule consumes one classified database error: the captures of the
//! signature that matched, the reported position when there is one, and the
//! session's schema snapshot. Rewrites are pure and leave text that no longer
//! shows the defect alone.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use super::scan::{self, Edit};
use crate::classify::{Classification, ErrorCategory};
use crate::schema::SchemaSnapshot;

/// Everything an error-driven rewrite may look at.
#[derive(Debug, Clone, Copy)]
pub struct RewriteInput<'a> {
    pub sql: &'a str,
    pub captures: &'a [String],
    /// 1-based character offset reported by the database.
    pub position: Option<usize>,
    pub schema: &'a SchemaSnapshot,
}

impl RewriteInput<'_> {
    /// Capture `index`, empty when absent.
    pub fn capture(&self, index: usize) -> &str {
        self.captures.get(index).map(String::as_str).unwrap_or("")
    }

    fn offset(&self) -> Option<usize> {
        self.position.and_then(|p| scan::char_to_byte(self.sql, p))
    }

    fn unchanged(&self) -> String {
        self.sql.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorRule {
    pub id: &'static str,
    pub category: ErrorCategory,
    /// Signature ids (see `classify::SIGNATURES`) whose captures this rule reads.
    pub signatures: &'static [&'static str],
    pub rewrite: fn(&RewriteInput<'_>) -> String,
}

pub static ERROR_RULES: &[ErrorRule] = &[
    ErrorRule {
        id: "cast_recursive_anchor_column",
        category: ErrorCategory::TypeMismatch,
        signatures: &["pg_recursive_cte_types"],
        rewrite: cast_recursive_anchor_column,
    },
    ErrorRule {
        id: "cast_round_argument",
        category: ErrorCategory::TypeMismatch,
        signatures: &["pg_function_signature"],
        rewrite: cast_round_argument,
    },
    ErrorRule {
        id: "cast_branch_to_common_type",
        category: ErrorCategory::TypeMismatch,
        signatures: &["pg_case_types", "pg_union_types"],
        rewrite: cast_branch_to_common_type,
    },
    ErrorRule {
        id: "cast_comparison_operand",
        category: ErrorCategory::TypeMismatch,
        signatures: &["pg_operator_mismatch"],
        rewrite: cast_comparison_operand,
    },
    ErrorRule {
        id: "resolve_missing_column",
        category: ErrorCategory::MissingColumn,
        signatures: &["pg_missing_column", "sqlite_no_such_column"],
        rewrite: resolve_missing_column,
    },
    ErrorRule {
        id: "qualify_ambiguous_column",
        category: ErrorCategory::AmbiguousColumn,
        signatures: &["pg_ambiguous_column", "sqlite_ambiguous_column"],
        rewrite: qualify_ambiguous_column,
    },
    ErrorRule {
        id: "extend_group_by",
        category: ErrorCategory::GroupByViolation,
        signatures: &["pg_group_by"],
        rewrite: extend_group_by,
    },
    ErrorRule {
        id: "resolve_missing_table",
        category: ErrorCategory::MissingTable,
        signatures: &["pg_missing_relation", "sqlite_no_such_table"],
        rewrite: resolve_missing_table,
    },
    ErrorRule {
        id: "restructure_syntax",
        category: ErrorCategory::SyntaxError,
        signatures: &[
            "pg_syntax_error",
            "pg_syntax_end",
            "sqlite_syntax_error",
            "sqlite_incomplete",
        ],
        rewrite: restructure_syntax,
    },
];

/// Result of applying every rule a classification selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFix {
    pub text: String,
    /// Ids of the rules that changed the text, in application order.
    pub applied: Vec<String>,
}

impl ErrorFix {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Apply the rules of every matched category, in classification order.
///
/// The reported position refers to the text the database saw, so it is only
/// handed to rules while that text is still unchanged.
pub fn apply_error_fixes(
    sql: &str,
    classification: &Classification,
    schema: &SchemaSnapshot,
) -> ErrorFix {
    let mut fix = ErrorFix {
        text: sql.to_string(),
        applied: Vec::new(),
    };

    for matched in &classification.matches {
        for rule in ERROR_RULES
            .iter()
            .filter(|r| r.signatures.contains(&matched.signature_id))
        {
            let input = RewriteInput {
                sql: &fix.text,
                captures: &matched.captures,
                position: classification.position.filter(|_| fix.applied.is_empty()),
                schema,
            };
            let next = (rule.rewrite)(&input);
            if next != fix.text {
                fix.text = next;
                fix.applied.push(rule.id.to_string());
            }
        }
    }
    fix
}

// =============================================================================
// Type mismatches
// =============================================================================

/// `recursive query "t" column N has type A in non-recursive term but type B
/// overall`: cast column N of the anchor SELECT to B.
pub fn cast_recursive_anchor_column(input: &RewriteInput<'_>) -> String {
    let cte = input.capture(0);
    let overall = input.capture(3);
    let Ok(column) = input.capture(1).parse::<usize>() else {
        return input.unchanged();
    };
    if cte.is_empty() || overall.is_empty() || column == 0 {
        return input.unchanged();
    }

    let masked = scan::mask(input.sql);
    let edit = cte_body(&masked, cte).and_then(|body| {
        let union_at = top_level_keyword(&masked, body.clone(), "UNION")?;
        let anchor = body.start..union_at;
        let select_at = top_level_keyword(&masked, anchor.clone(), "SELECT")?;
        let mut list_start = select_at + "SELECT".len();
        let after_select = scan::skip_spaces(&masked, list_start);
        if let Some(end) = keyword_at(&masked, after_select, "DISTINCT") {
            list_start = end;
        }
        let list_end = top_level_keyword(&masked, list_start..anchor.end, "FROM")
            .unwrap_or(anchor.end);
        let items = scan::split_top_level(&masked, list_start..list_end);
        let item = scan::trim_range(&masked, items.get(column - 1)?.clone());
        let expr = strip_alias(&masked, item);
        cast_edit(input.sql, &masked, expr, overall)
    });
    scan::splice(input.sql, edit.into_iter().collect())
}

/// `function round(double precision, integer) does not exist`: cast the first
/// argument of two-argument `ROUND` calls to numeric. With a position only
/// the call there is touched.
pub fn cast_round_argument(input: &RewriteInput<'_>) -> String {
    if !input.capture(0).eq_ignore_ascii_case("round") {
        return input.unchanged();
    }
    let first_type = input.capture(1).split(',').next().unwrap_or("").trim();
    if first_type.is_empty() || first_type.eq_ignore_ascii_case("numeric") {
        return input.unchanged();
    }

    let masked = scan::mask(input.sql);
    let offset = input.offset();
    let mut edits = Vec::new();
    for call in round_call_regex().find_iter(&masked) {
        if offset.is_some_and(|at| at != call.start()) {
            continue;
        }
        let open = call.end() - 1;
        let Some(close) = scan::matching_close(&masked, open) else {
            continue;
        };
        let args = scan::split_top_level(&masked, open + 1..close);
        if args.len() != 2 {
            continue;
        }
        let first = scan::trim_range(&masked, args[0].clone());
        if first.is_empty() {
            continue;
        }
        edits.extend(cast_edit(input.sql, &masked, first, "numeric"));
    }
    scan::splice(input.sql, edits)
}

/// `CASE types A and B cannot be matched` (or UNION/INTERSECT/EXCEPT): the
/// expression at the reported position gets cast to A, the type already
/// chosen for the earlier branches.
pub fn cast_branch_to_common_type(input: &RewriteInput<'_>) -> String {
    let target = input.capture(0);
    let Some(at) = input.offset() else {
        return input.unchanged();
    };
    if target.is_empty() || target.eq_ignore_ascii_case("unknown") {
        return input.unchanged();
    }
    let masked = scan::mask(input.sql);
    let edit = cast_operand_after(&masked, at)
        .filter(|span| span.start == at)
        .and_then(|span| cast_edit(input.sql, &masked, span, target));
    scan::splice(input.sql, edit.into_iter().collect())
}

/// `operator does not exist: text = integer`: cast the text-typed side of the
/// operator at the reported position to the other side's type.
pub fn cast_comparison_operand(input: &RewriteInput<'_>) -> String {
    let (left_type, operator, right_type) = (input.capture(0), input.capture(1), input.capture(2));
    let Some(at) = input.offset() else {
        return input.unchanged();
    };
    let masked = scan::mask(input.sql);
    if operator.is_empty() || !masked[at..].starts_with(operator) {
        return input.unchanged();
    }

    let edit = match (is_text_type(left_type), is_text_type(right_type)) {
        (true, false) => cast_operand_before(&masked, at)
            .and_then(|span| cast_edit(input.sql, &masked, span, right_type)),
        (false, true) => cast_operand_after(&masked, at + operator.len())
            .and_then(|span| cast_edit(input.sql, &masked, span, left_type)),
        _ => None,
    };
    scan::splice(input.sql, edit.into_iter().collect())
}

fn is_text_type(ty: &str) -> bool {
    matches!(
        ty.trim().to_ascii_lowercase().as_str(),
        "text" | "unknown" | "name" | "character varying" | "varchar" | "character" | "char" | "bpchar"
    )
}

/// Operand ending at `end`, including any `::type` suffixes it carries.
fn cast_operand_before(masked: &str, end: usize) -> Option<Range<usize>> {
    let mut span = scan::operand_before(masked, end)?;
    loop {
        let head = masked[..span.start].trim_end();
        let Some(before_cast) = head.strip_suffix("::") else {
            break;
        };
        let inner = scan::operand_before(masked, before_cast.len())?;
        span = inner.start..span.end;
    }
    Some(span)
}

/// Operand starting at or after `at`, including any `::type` suffixes.
fn cast_operand_after(masked: &str, at: usize) -> Option<Range<usize>> {
    let mut span = scan::operand_after(masked, at)?;
    while scan::followed_by_cast(masked, span.end) {
        let colons = scan::skip_spaces(masked, span.end);
        let ty = scan::operand_after(masked, colons + 2)?;
        span = span.start..ty.end;
    }
    Some(span)
}

/// Cast the operand at `span` to `ty`, unless its last cast already is `ty`.
fn cast_edit(sql: &str, masked: &str, span: Range<usize>, ty: &str) -> Option<Edit> {
    let operand = &masked[span.clone()];
    let already = operand
        .rfind("::")
        .is_some_and(|i| operand[i + 2..].trim().eq_ignore_ascii_case(ty.trim()));
    if already {
        return None;
    }
    let text = scan::with_cast(&sql[span.clone()], ty);
    Some(Edit::replace(span, text))
}

// =============================================================================
// Column and table references
// =============================================================================

/// `column "x" does not exist`: replace the reference with the database's
/// hint, or with the closest known column by edit distance.
pub fn resolve_missing_column(input: &RewriteInput<'_>) -> String {
    let (qualifier, column, hint) = (input.capture(0), input.capture(1), input.capture(2));
    if column.is_empty() {
        return input.unchanged();
    }
    let masked = scan::mask(input.sql);

    let replacement = if !hint.is_empty() && !hint.eq_ignore_ascii_case(column) {
        Some(hint.to_string())
    } else {
        let refs = table_refs(&masked);
        let mut candidates: Vec<&str> = refs
            .iter()
            .filter(|r| qualifier.is_empty() || r.alias.eq_ignore_ascii_case(qualifier))
            .filter_map(|r| input.schema.columns(&r.table))
            .flat_map(|cols| cols.keys().map(String::as_str))
            .collect();
        if candidates.is_empty() {
            candidates = input.schema.column_names();
        }
        nearest(column, candidates)
    };
    let Some(replacement) = replacement else {
        return input.unchanged();
    };

    let prefix = format!("{}.", qualifier);
    let edits = scan::word_occurrences(&masked, column)
        .into_iter()
        .filter(|&at| {
            if qualifier.is_empty() {
                !is_call(&masked, at + column.len()) && !follows_keyword(&masked, at, "AS")
            } else {
                at >= prefix.len()
                    && masked.as_bytes()[at - prefix.len()..at]
                        .eq_ignore_ascii_case(prefix.as_bytes())
            }
        })
        .map(|at| Edit::replace(at..at + column.len(), replacement.clone()))
        .collect();
    scan::splice(input.sql, edits)
}

/// `column reference "x" is ambiguous`: prefix unqualified references with the
/// first FROM/JOIN alias whose table has the column (the first alias when no
/// table is known to). With a position only the reference there is
/// qualified. Without one every unqualified reference is, not just the
/// first: qualifying a single site would leave the next one for the
/// following pass, so the rewrite would not be idempotent.
pub fn qualify_ambiguous_column(input: &RewriteInput<'_>) -> String {
    let column = input.capture(0);
    if column.is_empty() {
        return input.unchanged();
    }
    let masked = scan::mask(input.sql);
    let refs = table_refs(&masked);
    let Some(alias) = refs
        .iter()
        .find(|r| input.schema.has_column(&r.table, column))
        .or_else(|| refs.first())
        .map(|r| r.alias.clone())
    else {
        return input.unchanged();
    };

    let sites = unqualified_sites(&masked, column);
    let chosen: Vec<usize> = match input.offset() {
        Some(at) => sites
            .into_iter()
            .filter(|&s| s <= at && at < s + column.len())
            .collect(),
        None => sites,
    };
    let edits = chosen
        .into_iter()
        .map(|at| Edit::insert(at, format!("{}.", alias)))
        .collect();
    scan::splice(input.sql, edits)
}

/// `column "x" must appear in the GROUP BY clause`: append the column to the
/// GROUP BY of the query level it was reported in.
pub fn extend_group_by(input: &RewriteInput<'_>) -> String {
    let (qualifier, column) = (input.capture(0), input.capture(1));
    if column.is_empty() {
        return input.unchanged();
    }
    let expr = if qualifier.is_empty() {
        column.to_string()
    } else {
        format!("{}.{}", qualifier, column)
    };

    let masked = scan::mask(input.sql);
    let groups: Vec<_> = group_by_regex().find_iter(&masked).collect();
    let chosen = match input.offset() {
        Some(at) => {
            let level = scan::enclosing_open(&masked, at);
            groups
                .iter()
                .find(|g| g.start() >= at && scan::enclosing_open(&masked, g.start()) == level)
        }
        None => groups.first(),
    };
    let Some(group) = chosen else {
        return input.unchanged();
    };

    let list = group.end()..group_list_end(&masked, group.end());
    let present = scan::split_top_level(&masked, list.clone())
        .into_iter()
        .map(|item| masked[item].split_whitespace().collect::<String>())
        .any(|item| item.eq_ignore_ascii_case(&expr));
    let end = scan::trim_range(&masked, list).end;
    if present || end <= group.end() {
        return input.unchanged();
    }
    scan::splice(input.sql, vec![Edit::insert(end, format!(", {}", expr))])
}

/// `relation "x" does not exist`: rename table references (after FROM/JOIN,
/// or used as a qualifier) to the closest known table or CTE name.
pub fn resolve_missing_table(input: &RewriteInput<'_>) -> String {
    let table = input.capture(1);
    if table.is_empty() {
        return input.unchanged();
    }
    let masked = scan::mask(input.sql);
    let ctes = cte_names(&masked);
    let candidates = input
        .schema
        .table_names()
        .chain(ctes.iter().map(String::as_str));
    let Some(replacement) = nearest(table, candidates) else {
        return input.unchanged();
    };

    let bytes = masked.as_bytes();
    let edits = scan::word_occurrences(&masked, table)
        .into_iter()
        .filter(|&at| {
            let mut start = at;
            if start > 0 && bytes[start - 1] == b'.' {
                start -= 1;
                while start > 0 && scan::is_ident_byte(bytes[start - 1]) {
                    start -= 1;
                }
            }
            let used_as_qualifier = bytes.get(at + table.len()) == Some(&b'.');
            let previous = previous_word(&masked, start);
            used_as_qualifier
                || previous.eq_ignore_ascii_case("FROM")
                || previous.eq_ignore_ascii_case("JOIN")
        })
        .map(|at| Edit::replace(at..at + table.len(), replacement.clone()))
        .collect();
    scan::splice(input.sql, edits)
}

/// Syntax errors carry no usable captures; rerun the structural table.
pub fn restructure_syntax(input: &RewriteInput<'_>) -> String {
    super::apply_all_structural_rules(input.sql)
}

// =============================================================================
// Helpers
// =============================================================================

fn round_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bround\s*\(").expect("Invalid round regex"))
}

fn group_by_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bGROUP\s+BY\b").expect("Invalid group by regex"))
}

fn table_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:FROM|JOIN)\s+((?:[A-Za-z_]\w*\.)?[A-Za-z_]\w*)")
            .expect("Invalid table reference regex")
    })
}

fn cte_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\bWITH(?:\s+RECURSIVE)?|,)\s*([A-Za-z_]\w*)\s*(?:\([^()]*\)\s*)?AS\s*(?:NOT\s+)?(?:MATERIALIZED\s*)?\(")
            .expect("Invalid cte name regex")
    })
}

/// Words that can follow a table name without being its alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "ON", "LEFT", "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "NATURAL",
    "LATERAL", "GROUP", "ORDER", "LIMIT", "OFFSET", "FETCH", "HAVING", "WINDOW", "UNION",
    "INTERSECT", "EXCEPT", "USING", "FOR", "RETURNING", "SET",
];

/// Functions whose argument syntax contains a `FROM` that is not a table list.
const FROM_FUNCTIONS: &[&str] = &["EXTRACT", "SUBSTRING", "SUBSTR", "TRIM", "OVERLAY", "POSITION"];

/// Keywords that end a GROUP BY list.
const GROUP_LIST_TERMINATORS: &[&str] = &[
    "HAVING", "ORDER", "LIMIT", "OFFSET", "WINDOW", "UNION", "INTERSECT", "EXCEPT", "FETCH", "FOR",
];

/// Trailing words that are never a bare alias.
const NOT_ALIAS: &[&str] = &["END", "NULL", "TRUE", "FALSE"];

/// Words after which a trailing identifier is an operand, not an alias.
const OPERATOR_WORDS: &[&str] = &[
    "AND", "OR", "NOT", "IS", "IN", "LIKE", "ILIKE", "THEN", "ELSE", "WHEN", "BETWEEN",
    "DISTINCT", "CASE", "AS", "SELECT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct TableRef {
    /// Lowercased table name, schema prefix dropped.
    table: String,
    /// Alias, or the table name when there is none.
    alias: String,
}

/// FROM/JOIN table references in order of appearance.
fn table_refs(masked: &str) -> Vec<TableRef> {
    let mut refs = Vec::new();
    for caps in table_ref_regex().captures_iter(masked) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let in_function = scan::enclosing_open(masked, whole.start()).is_some_and(|open| {
            let word = previous_word(masked, open);
            FROM_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(word))
        });
        if in_function {
            continue;
        }
        let table = name
            .as_str()
            .rsplit('.')
            .next()
            .unwrap_or(name.as_str())
            .to_lowercase();
        let alias = alias_after(masked, name.end()).unwrap_or_else(|| table.clone());
        refs.push(TableRef { table, alias });
    }
    refs
}

/// `[AS] alias` following a table name that ends at `end`.
fn alias_after(masked: &str, end: usize) -> Option<String> {
    let mut at = scan::skip_spaces(masked, end);
    if at == end {
        return None;
    }
    if let Some(after_as) = keyword_at(masked, at, "AS") {
        at = scan::skip_spaces(masked, after_as);
    }
    let bytes = masked.as_bytes();
    let first = *bytes.get(at)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut stop = at;
    while stop < bytes.len() && scan::is_ident_byte(bytes[stop]) {
        stop += 1;
    }
    let word = &masked[at..stop];
    if CLAUSE_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word)) {
        return None;
    }
    Some(word.to_string())
}

fn cte_names(masked: &str) -> Vec<String> {
    cte_name_regex()
        .captures_iter(masked)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_lowercase()))
        .collect()
}

/// Range inside the parentheses of the CTE named `name`.
fn cte_body(masked: &str, name: &str) -> Option<Range<usize>> {
    for at in scan::word_occurrences(masked, name) {
        let mut i = scan::skip_spaces(masked, at + name.len());
        if masked.as_bytes().get(i) == Some(&b'(') {
            i = scan::skip_spaces(masked, scan::matching_close(masked, i)? + 1);
        }
        let Some(after_as) = keyword_at(masked, i, "AS") else {
            continue;
        };
        let mut i = scan::skip_spaces(masked, after_as);
        if let Some(end) = keyword_at(masked, i, "NOT") {
            i = scan::skip_spaces(masked, end);
        }
        if let Some(end) = keyword_at(masked, i, "MATERIALIZED") {
            i = scan::skip_spaces(masked, end);
        }
        if masked.as_bytes().get(i) == Some(&b'(') {
            let close = scan::matching_close(masked, i)?;
            return Some(i + 1..close);
        }
    }
    None
}

/// End offset of `keyword` when it starts exactly at `at`.
fn keyword_at(masked: &str, at: usize, keyword: &str) -> Option<usize> {
    let bytes = masked.as_bytes();
    let end = at + keyword.len();
    let matches = bytes
        .get(at..end)
        .is_some_and(|w| w.eq_ignore_ascii_case(keyword.as_bytes()));
    let bounded = bytes.get(end).map_or(true, |b| !scan::is_ident_byte(*b));
    (matches && bounded).then_some(end)
}

/// First occurrence of `keyword` in `range` at the range's own nesting level.
fn top_level_keyword(masked: &str, range: Range<usize>, keyword: &str) -> Option<usize> {
    let bytes = masked.as_bytes();
    scan::word_occurrences(masked, keyword)
        .into_iter()
        .filter(|&at| at >= range.start && at + keyword.len() <= range.end)
        .find(|&at| {
            let depth: i32 = bytes[range.start..at]
                .iter()
                .map(|&b| match b {
                    b'(' => 1,
                    b')' => -1,
                    _ => 0,
                })
                .sum();
            depth == 0
        })
}

/// The identifier run ending right before `at`, whitespace skipped.
fn previous_word(masked: &str, at: usize) -> &str {
    let head = masked[..at].trim_end();
    let bytes = head.as_bytes();
    let mut start = bytes.len();
    while start > 0 && scan::is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    &head[start..]
}

fn follows_keyword(masked: &str, at: usize, keyword: &str) -> bool {
    previous_word(masked, at).eq_ignore_ascii_case(keyword)
}

fn is_call(masked: &str, end: usize) -> bool {
    masked.as_bytes().get(scan::skip_spaces(masked, end)) == Some(&b'(')
}

/// Unqualified references to `column`: not `x.column`, not a qualifier
/// itself, not a function name, not an output alias.
fn unqualified_sites(masked: &str, column: &str) -> Vec<usize> {
    let bytes = masked.as_bytes();
    scan::word_occurrences(masked, column)
        .into_iter()
        .filter(|&at| {
            let end = at + column.len();
            !(at > 0 && bytes[at - 1] == b'.')
                && bytes.get(end) != Some(&b'.')
                && !is_call(masked, end)
                && !follows_keyword(masked, at, "AS")
        })
        .collect()
}

/// Where a GROUP BY list starting at `start` ends.
fn group_list_end(masked: &str, start: usize) -> usize {
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    for i in start..bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' if depth == 0 => return i,
            b')' => depth -= 1,
            b';' if depth == 0 => return i,
            b if depth == 0 && scan::is_ident_byte(b) && (i == 0 || !scan::is_ident_byte(bytes[i - 1])) => {
                if GROUP_LIST_TERMINATORS
                    .iter()
                    .any(|k| keyword_at(masked, i, k).is_some())
                {
                    return i;
                }
            }
            _ => {}
        }
    }
    bytes.len()
}

/// The expression part of a select item, without `AS alias` or a bare alias.
fn strip_alias(masked: &str, item: Range<usize>) -> Range<usize> {
    if let Some(as_at) = top_level_keyword(masked, item.clone(), "AS") {
        return scan::trim_range(masked, item.start..as_at);
    }

    let bytes = masked.as_bytes();
    let mut alias_start = item.end;
    while alias_start > item.start && scan::is_ident_byte(bytes[alias_start - 1]) {
        alias_start -= 1;
    }
    if alias_start == item.end || alias_start == item.start || !bytes[alias_start - 1].is_ascii_whitespace() {
        return item;
    }
    let alias = &masked[alias_start..item.end];
    if NOT_ALIAS.iter().any(|k| k.eq_ignore_ascii_case(alias)) {
        return item;
    }
    let expr = scan::trim_range(masked, item.start..alias_start);
    let Some(&last) = bytes[expr.clone()].last() else {
        return item;
    };
    let operand_end = scan::is_ident_byte(last) || matches!(last, b')' | b'\'' | b'"');
    let previous = previous_word(masked, alias_start);
    if !operand_end || OPERATOR_WORDS.iter().any(|k| k.eq_ignore_ascii_case(previous)) {
        return item;
    }
    expr
}

/// Closest candidate to `name`: edit distance at most max(2, len/3), ties go
/// to the first candidate.
fn nearest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let limit = (name.chars().count() / 3).max(2);
    candidates
        .into_iter()
        .filter(|c| !c.eq_ignore_ascii_case(name))
        .map(|c| (scan::edit_distance(name, c), c))
        .filter(|(distance, _)| *distance <= limit)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, c)| c.to_string())
}
