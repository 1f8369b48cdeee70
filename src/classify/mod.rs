//! Classify database error messages.
//!
//! The catalogue in [`signatures`] covers PostgreSQL and SQLite wording. A
//! message can match several categories at once; every matching category is
//! reported, in catalogue order, with the captures of its first matching
//! signature.

mod signatures;

use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

pub use signatures::{Signature, SIGNATURES};

/// Closed taxonomy of repairable defects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TypeMismatch,
    MissingColumn,
    AmbiguousColumn,
    GroupByViolation,
    MissingTable,
    SyntaxError,
    /// Logging fallback for messages nothing in the catalogue recognises.
    /// Never appears inside a [`Classification`].
    Unclassified,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TypeMismatch => "type_mismatch",
            ErrorCategory::MissingColumn => "missing_column",
            ErrorCategory::AmbiguousColumn => "ambiguous_column",
            ErrorCategory::GroupByViolation => "group_by_violation",
            ErrorCategory::MissingTable => "missing_table",
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One matched category and the fragments its signature captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryMatch {
    pub category: ErrorCategory,
    pub signature_id: &'static str,
    pub captures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub matches: Vec<CategoryMatch>,
    pub raw_message: String,
    /// 1-based character offset of the error in the SQL text, when reported.
    pub position: Option<usize>,
}

impl Classification {
    pub fn with_position(mut self, position: Option<usize>) -> Self {
        self.position = position;
        self
    }

    pub fn categories(&self) -> impl Iterator<Item = ErrorCategory> + '_ {
        self.matches.iter().map(|m| m.category)
    }

    /// Comma-separated category names, for logs and the attempt log.
    pub fn label(&self) -> String {
        self.categories()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

struct Catalogue {
    set: RegexSet,
    regexes: Vec<Regex>,
}

fn catalogue() -> &'static Catalogue {
    static CATALOGUE: OnceLock<Catalogue> = OnceLock::new();
    CATALOGUE.get_or_init(|| Catalogue {
        set: RegexSet::new(SIGNATURES.iter().map(|s| s.regex))
            .expect("Invalid signature catalogue"),
        regexes: SIGNATURES
            .iter()
            .map(|s| Regex::new(s.regex).expect("Invalid signature regex"))
            .collect(),
    })
}

/// Match `message` against the catalogue. `None` when no signature matches.
pub fn classify(message: &str) -> Option<Classification> {
    let catalogue = catalogue();
    let mut matches: Vec<CategoryMatch> = Vec::new();

    for index in catalogue.set.matches(message).iter() {
        let signature = &SIGNATURES[index];
        if matches.iter().any(|m| m.category == signature.category) {
            continue;
        }
        let Some(caps) = catalogue.regexes[index].captures(message) else {
            continue;
        };
        let captures = caps
            .iter()
            .skip(1)
            .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        matches.push(CategoryMatch {
            category: signature.category,
            signature_id: signature.id,
            captures,
        });
    }

    if matches.is_empty() {
        return None;
    }
    Some(Classification {
        matches,
        raw_message: message.to_string(),
        position: None,
    })
}
