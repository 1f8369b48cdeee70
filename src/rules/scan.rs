//! Lexical helpers shared by every rewrite rule.
//!
//! Rules never parse SQL. They work on a *masked* copy of the text in which
//! the interiors of string literals, dollar-quoted bodies and comments are
//! blanked to spaces. The mask has the same byte length as the original, so a
//! rule locates a site in the mask and splices the original at the same
//! offsets.

use std::ops::Range;

// =============================================================================
// Masking
// =============================================================================

/// Blank out literal and comment interiors, keeping byte offsets stable.
///
/// Single quotes stay in place so literals remain recognisable as operands.
pub fn mask(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            out[i] = b' ';
                            out[i + 1] = b' ';
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    out[i] = b' ';
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    out[i] = b' ';
                    i += 1;
                }
                if i < bytes.len() {
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    i += 2;
                }
            }
            b'$' if bytes.get(i + 1) == Some(&b'$') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'$')) {
                    out[i] = b' ';
                    i += 1;
                }
                i += 2;
            }
            _ => i += 1,
        }
    }

    // Every masked region is replaced byte-for-byte with ASCII, so the
    // result is still valid UTF-8.
    String::from_utf8_lossy(&out).into_owned()
}

// =============================================================================
// Edits
// =============================================================================

/// A single splice against the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub text: String,
}

impl Edit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            range: at..at,
            text: text.into(),
        }
    }

    pub fn replace(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self {
            range,
            text: String::new(),
        }
    }
}

/// Apply edits to `sql`. Overlapping edits after the first are dropped.
pub fn splice(sql: &str, mut edits: Vec<Edit>) -> String {
    if edits.is_empty() {
        return sql.to_string();
    }
    edits.sort_by_key(|e| (e.range.start, e.range.end));

    let mut out = String::with_capacity(sql.len() + 16);
    let mut cursor = 0;
    for edit in edits {
        let Range { start, end } = edit.range;
        if start < cursor
            || end > sql.len()
            || !sql.is_char_boundary(start)
            || !sql.is_char_boundary(end)
        {
            continue;
        }
        out.push_str(&sql[cursor..start]);
        out.push_str(&edit.text);
        cursor = end;
    }
    out.push_str(&sql[cursor..]);
    out
}

// =============================================================================
// Tokens
// =============================================================================

pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offsets of whole-word, ASCII case-insensitive occurrences of `word`.
pub fn word_occurrences(masked: &str, word: &str) -> Vec<usize> {
    let hay = masked.as_bytes();
    let needle = word.as_bytes();
    let mut found = Vec::new();
    if needle.is_empty() || needle.len() > hay.len() {
        return found;
    }

    for start in 0..=hay.len() - needle.len() {
        let end = start + needle.len();
        if !hay[start..end].eq_ignore_ascii_case(needle) {
            continue;
        }
        let left_ok = start == 0 || !is_ident_byte(hay[start - 1]);
        let right_ok = end == hay.len() || !is_ident_byte(hay[end]);
        if left_ok && right_ok {
            found.push(start);
        }
    }
    found
}

/// Render `keyword` in the letter case of the token it replaces.
pub fn match_case(original: &str, keyword: &str) -> String {
    if original.chars().any(|c| c.is_ascii_uppercase()) {
        keyword.to_ascii_uppercase()
    } else {
        keyword.to_ascii_lowercase()
    }
}

/// Convert a 1-based character position (as reported by Postgres) to a byte
/// offset.
pub fn char_to_byte(sql: &str, position: usize) -> Option<usize> {
    if position == 0 {
        return None;
    }
    sql.char_indices().nth(position - 1).map(|(i, _)| i)
}

pub fn skip_spaces(masked: &str, mut at: usize) -> usize {
    let bytes = masked.as_bytes();
    while at < bytes.len() && bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    at
}

// =============================================================================
// Parentheses
// =============================================================================

/// Offset of the `)` closing the `(` at `open`.
pub fn matching_close(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Offset of the `(` opened by the `)` at `close`.
pub fn matching_open(masked: &str, close: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Offset of the innermost `(` still open at `at`.
pub fn enclosing_open(masked: &str, at: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    for i in (0..at.min(bytes.len())).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' if depth == 0 => return Some(i),
            b'(' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Split `range` of the masked text on commas at its own nesting level.
pub fn split_top_level(masked: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let bytes = masked.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = range.start;
    for i in range.clone() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(start..i);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(start..range.end);
    parts
}

/// Shrink a range so it excludes surrounding whitespace.
pub fn trim_range(masked: &str, range: Range<usize>) -> Range<usize> {
    let bytes = masked.as_bytes();
    let (mut start, mut end) = (range.start, range.end);
    while start < end && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    while end > start && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    start..end
}

// =============================================================================
// Operands
// =============================================================================

/// Span of the operand that starts at or after `at`: a literal, a number, a
/// (qualified) identifier with an optional call suffix, or a parenthesised
/// expression.
pub fn operand_after(masked: &str, at: usize) -> Option<Range<usize>> {
    let bytes = masked.as_bytes();
    let start = skip_spaces(masked, at);
    let first = *bytes.get(start)?;

    let end = match first {
        b'\'' => start + 1 + masked[start + 1..].find('\'')? + 1,
        b'(' => matching_close(masked, start)? + 1,
        b if b.is_ascii_digit() => {
            let mut i = start;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            i
        }
        b if is_ident_byte(b) || b == b'"' => {
            let mut i = start;
            while i < bytes.len() && (is_ident_byte(bytes[i]) || bytes[i] == b'.' || bytes[i] == b'"')
            {
                i += 1;
            }
            if bytes.get(i) == Some(&b'(') {
                matching_close(masked, i)? + 1
            } else {
                i
            }
        }
        _ => return None,
    };
    Some(start..end)
}

/// Span of the operand that ends right before `end` (whitespace skipped).
pub fn operand_before(masked: &str, end: usize) -> Option<Range<usize>> {
    let bytes = masked.as_bytes();
    let mut stop = end;
    while stop > 0 && bytes[stop - 1].is_ascii_whitespace() {
        stop -= 1;
    }
    if stop == 0 {
        return None;
    }

    let last = bytes[stop - 1];
    let mut start = match last {
        b'\'' => masked[..stop - 1].rfind('\'')?,
        b')' => matching_open(masked, stop - 1)?,
        b if is_ident_byte(b) || b == b'"' => stop - 1,
        _ => return None,
    };
    // Identifier chain, or the function name in front of a call.
    while start > 0 && (is_ident_byte(bytes[start - 1]) || bytes[start - 1] == b'.' || bytes[start - 1] == b'"') {
        start -= 1;
    }
    Some(start..stop)
}

/// True when the operand text needs parentheses before a `::` cast suffix.
pub fn needs_parens(operand: &str) -> bool {
    let bytes = operand.as_bytes();
    if bytes.first() == Some(&b'(') {
        return false;
    }
    let mut depth = 0i32;
    for &b in bytes {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b if depth == 0 && !(is_ident_byte(b) || b == b'.' || b == b'"' || b == b'\'') => {
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Append a `::ty` cast to `operand`, parenthesising when required.
pub fn with_cast(operand: &str, ty: &str) -> String {
    if needs_parens(operand) {
        format!("({})::{}", operand, ty)
    } else {
        format!("{}::{}", operand, ty)
    }
}

/// True when the masked text after `end` already starts with a `::` cast.
pub fn followed_by_cast(masked: &str, end: usize) -> bool {
    masked[skip_spaces(masked, end)..].starts_with("::")
}

// =============================================================================
// Similarity
// =============================================================================

/// Levenshtein distance over chars, case-insensitive.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
