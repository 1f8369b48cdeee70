//! Structural rewrites - rules that read the SQL text itself.
//!
//! Each function is one pass over the text. A pass fixes every site it can
//! see, and none of them can undo another rule's work: each strictly lowers
//! the count of the defect it targets.

use std::sync::OnceLock;

use regex::Regex;

use super::scan::{self, Edit};

fn repeated_semicolons_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r";(?:\s*;)+").expect("Invalid semicolon regex"))
}

/// A run of opening parens, paren-free content, and a run of closing parens.
fn paren_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\(+)([^(),]*)(\)+)").expect("Invalid paren run regex"))
}

fn round_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bround\s*\(").expect("Invalid round regex"))
}

/// A cast type name sitting immediately before a closing paren.
fn trailing_cast_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"::\s*[A-Za-z_][A-Za-z0-9_]*\s*$").expect("Invalid trailing cast regex")
    })
}

fn precision_arg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*,\s*\d+\s*\)").expect("Invalid precision regex"))
}

fn cast_chain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"::\s*[A-Za-z_][A-Za-z0-9_]*(?:\s*\[\])?(?:\s*::\s*[A-Za-z_][A-Za-z0-9_]*(?:\s*\[\])?)+")
            .expect("Invalid cast chain regex")
    })
}

fn case_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:CASE|WHEN|THEN|ELSE|END|AS|FROM)\b|[(),;]")
            .expect("Invalid case token regex")
    })
}

// =============================================================================
// Rewrites
// =============================================================================

/// `;;` and `; ;` runs become a single `;`.
pub fn collapse_repeated_semicolons(sql: &str) -> String {
    let masked = scan::mask(sql);
    let edits = repeated_semicolons_regex()
        .find_iter(&masked)
        .map(|m| Edit::replace(m.range(), ";"))
        .collect();
    scan::splice(sql, edits)
}

/// `((x))` becomes `(x)`; unbalanced runs keep their surplus: `(((x))` becomes
/// `((x)`. Content containing a top-level comma is left alone so row
/// constructors such as `IN ((1, 2))` keep their meaning.
pub fn collapse_redundant_parens(sql: &str) -> String {
    let masked = scan::mask(sql);
    let mut edits = Vec::new();

    for caps in paren_run_regex().captures_iter(&masked) {
        let (Some(opens), Some(content), Some(closes)) = (caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let pairs = opens.len().min(closes.len());
        if pairs < 2 || content.as_str().trim().is_empty() {
            continue;
        }
        let text = format!(
            "{}{}{}",
            "(".repeat(opens.len() - pairs + 1),
            &sql[content.range()],
            ")".repeat(closes.len() - pairs + 1)
        );
        edits.push(Edit::replace(opens.start()..closes.end(), text));
    }
    scan::splice(sql, edits)
}

/// `ROUND(x::numeric), 2)` - the cast's closer ends the call before its
/// precision argument. Drop that closer.
pub fn round_cast_extra_paren(sql: &str) -> String {
    let masked = scan::mask(sql);
    let bytes = masked.as_bytes();
    let mut edits = Vec::new();

    for call in round_call_regex().find_iter(&masked) {
        let open = call.end() - 1;
        let Some(close) = scan::matching_close(&masked, open) else {
            continue;
        };
        let args = &bytes[open + 1..close];
        let has_top_level_comma = {
            let mut depth = 0i32;
            args.iter().any(|&b| {
                match b {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    _ => {}
                }
                b == b',' && depth == 0
            })
        };
        if has_top_level_comma {
            continue;
        }
        if !trailing_cast_regex().is_match(&masked[open + 1..close]) {
            continue;
        }
        let Some(precision) = precision_arg_regex().find(&masked[close + 1..]) else {
            continue;
        };
        // `COALESCE(ROUND(x::numeric), 0)` is valid: the closer after the
        // number belongs to the enclosing call.
        let precision_close = close + precision.end();
        let owned_by_enclosing = scan::enclosing_open(&masked, call.start())
            .and_then(|outer| scan::matching_close(&masked, outer))
            .is_some_and(|outer_close| outer_close == precision_close);
        if !owned_by_enclosing {
            edits.push(Edit::delete(close..close + 1));
        }
    }
    scan::splice(sql, edits)
}

/// `ROUND(x::numeric, 2 AS total` - the call never closes after its
/// precision argument. Insert the missing `)`.
pub fn round_cast_missing_paren(sql: &str) -> String {
    let masked = scan::mask(sql);
    let bytes = masked.as_bytes();
    let mut edits = Vec::new();

    for call in round_call_regex().find_iter(&masked) {
        let open = call.end() - 1;
        let mut depth = 1i32;
        let mut i = open + 1;
        while i < bytes.len() && depth > 0 {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth -= 1,
                b',' if depth == 1 => {
                    let digits_start = scan::skip_spaces(&masked, i + 1);
                    let mut digits_end = digits_start;
                    while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
                        digits_end += 1;
                    }
                    if digits_end > digits_start {
                        let next = scan::skip_spaces(&masked, digits_end);
                        if ends_select_item(&masked[next..]) {
                            edits.push(Edit::insert(digits_end, ")"));
                        }
                    }
                    break;
                }
                _ => {}
            }
            i += 1;
        }
    }
    scan::splice(sql, edits)
}

/// True when `rest` starts where a select item ends: `AS`, `FROM`, `,`, `;`
/// or the end of the text.
fn ends_select_item(rest: &str) -> bool {
    let head: String = rest
        .bytes()
        .take_while(|b| scan::is_ident_byte(*b))
        .map(|b| b.to_ascii_uppercase() as char)
        .collect();
    rest.is_empty()
        || rest.starts_with(',')
        || rest.starts_with(';')
        || head == "AS"
        || head == "FROM"
}

/// `x::numeric::numeric` becomes `x::numeric`. Chains of distinct types are
/// real conversions and are kept.
pub fn dedupe_chained_casts(sql: &str) -> String {
    let masked = scan::mask(sql);
    let mut edits = Vec::new();

    for chain in cast_chain_regex().find_iter(&masked) {
        let types: Vec<String> = chain
            .as_str()
            .split("::")
            .map(|t| t.split_whitespace().collect::<String>())
            .filter(|t| !t.is_empty())
            .collect();
        let mut kept: Vec<&String> = Vec::with_capacity(types.len());
        for ty in &types {
            if kept.last().is_some_and(|last| last.eq_ignore_ascii_case(ty)) {
                continue;
            }
            kept.push(ty);
        }
        if kept.len() == types.len() {
            continue;
        }
        let text: String = kept.iter().map(|t| format!("::{}", t)).collect();
        edits.push(Edit::replace(chain.range(), text));
    }
    scan::splice(sql, edits)
}

/// `CASE WHEN a THEN 1 THEN 0 END` - a `THEN` that follows a `THEN` branch
/// with no `WHEN` in between is the missing `ELSE`.
pub fn case_then_then_to_else(sql: &str) -> String {
    let edits = scan_case_blocks(sql, CaseFix::ThenThen);
    scan::splice(sql, edits)
}

/// A `CASE` still open when its select item ends (`AS`, `,`, `FROM`, `;`, an
/// enclosing `)` or the end of the text) gets its `END`.
pub fn case_missing_end(sql: &str) -> String {
    let edits = scan_case_blocks(sql, CaseFix::MissingEnd);
    scan::splice(sql, edits)
}

/// Unmatched `)` are dropped; unclosed `(` are closed at the end of the
/// statement, before any trailing `;`.
pub fn balance_parens(sql: &str) -> String {
    let masked = scan::mask(sql);
    let mut edits = Vec::new();
    let mut depth = 0usize;

    for (i, b) in masked.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' if depth == 0 => edits.push(Edit::delete(i..i + 1)),
            b')' => depth -= 1,
            _ => {}
        }
    }

    if depth > 0 {
        let body = masked.trim_end();
        let body = body.strip_suffix(';').unwrap_or(body).trim_end();
        edits.push(Edit::insert(body.len(), ")".repeat(depth)));
    }
    scan::splice(sql, edits)
}

// =============================================================================
// CASE block scanner
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseFix {
    ThenThen,
    MissingEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Case,
    When,
    Then,
    Else,
}

#[derive(Debug)]
struct CaseFrame {
    depth: usize,
    last: Branch,
}

impl CaseFrame {
    fn in_result(&self) -> bool {
        matches!(self.last, Branch::Then | Branch::Else)
    }
}

fn scan_case_blocks(sql: &str, fix: CaseFix) -> Vec<Edit> {
    let masked = scan::mask(sql);
    let mut edits = Vec::new();
    let mut frames: Vec<CaseFrame> = Vec::new();
    let mut depth = 0usize;

    for token in case_token_regex().find_iter(&masked) {
        let word = token.as_str();
        match word.to_ascii_uppercase().as_str() {
            "(" => depth += 1,
            ")" => {
                let at = trim_before(&masked, token.start());
                close_frames(&mut frames, &mut edits, fix, depth, " END", at);
                frames.retain(|f| f.depth < depth);
                depth = depth.saturating_sub(1);
            }
            "," | ";" => {
                let at = trim_before(&masked, token.start());
                close_frames(&mut frames, &mut edits, fix, depth, " END", at);
            }
            "AS" | "FROM" => close_frames(&mut frames, &mut edits, fix, depth, "END ", token.start()),
            "CASE" => frames.push(CaseFrame {
                depth,
                last: Branch::Case,
            }),
            "WHEN" => set_branch(&mut frames, depth, Branch::When),
            "ELSE" => set_branch(&mut frames, depth, Branch::Else),
            "THEN" => {
                let repeated = frames
                    .last()
                    .is_some_and(|f| f.depth == depth && f.last == Branch::Then);
                if repeated && fix == CaseFix::ThenThen {
                    edits.push(Edit::replace(token.range(), scan::match_case(word, "ELSE")));
                }
                let branch = if repeated { Branch::Else } else { Branch::Then };
                set_branch(&mut frames, depth, branch);
            }
            "END" => {
                if frames.last().is_some_and(|f| f.depth == depth) {
                    frames.pop();
                }
            }
            _ => {}
        }
    }

    let end = trim_before(&masked, masked.len());
    close_frames(&mut frames, &mut edits, fix, 0, " END", end);
    edits
}

/// Close every open CASE at `depth` whose current branch already has a result.
fn close_frames(
    frames: &mut Vec<CaseFrame>,
    edits: &mut Vec<Edit>,
    fix: CaseFix,
    depth: usize,
    text: &str,
    at: usize,
) {
    while frames.last().is_some_and(|f| f.depth == depth && f.in_result()) {
        frames.pop();
        if fix == CaseFix::MissingEnd {
            edits.push(Edit::insert(at, text));
        }
    }
}

fn set_branch(frames: &mut [CaseFrame], depth: usize, branch: Branch) {
    if let Some(frame) = frames.last_mut() {
        if frame.depth == depth {
            frame.last = branch;
        }
    }
}

/// Offset just past the last non-space byte before `at`.
fn trim_before(masked: &str, at: usize) -> usize {
    masked[..at].trim_end().len()
}
