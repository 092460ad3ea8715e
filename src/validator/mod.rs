//! SQL Safety Validation
//!
//! This module classifies a generated SQL string as SAFE or UNSAFE under one global,
//! read-only policy: a single `SELECT` statement with no mutating or administrative verbs.
//!
//! # Validation Strategy
//! 1. Normalize: strip comments (quote-aware), collapse whitespace, uppercase
//! 2. Reject stacked statements (a semicolon anywhere but the very end)
//! 3. Reject anything that does not begin with the `SELECT` keyword
//! 4. Reject any whole-word occurrence of a denylisted verb
//!
//! Matching is token based: `updated_at` is one identifier and never matches `UPDATE`.
//!
//! # Trust Boundary
//! This is a denylist classifier aimed at an imperfect but well-intentioned generator.
//! It does not prove that a statement is side-effect free (a `SELECT` can still call a
//! function that writes). The engines add a second layer: PostgreSQL statements run in a
//! `READ ONLY` transaction and SQLite databases are opened read-only.
//!
//! # Conservative Lexing
//! Comments are only removed where every supported dialect agrees they are comments.
//! When the text contains constructs whose lexing differs between dialects (backslash
//! escapes, nested block comments, dollar quotes, backtick or bracket identifiers),
//! comment removal stops and the remainder is scanned exactly as written. String
//! literal contents always stay visible, so a verb or semicolon inside a literal is
//! rejected too.

use std::fmt;

/// Verbs that make a statement UNSAFE wherever they appear as a whole word
///
/// `INTO` covers `SELECT ... INTO new_table`, which creates a table in PostgreSQL.
pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "INTO", "COPY", "MERGE", "CALL",
];

/// A raw string believed to be SQL, untrusted until validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateStatement(String);

impl CandidateStatement {
    /// Wrap a generated statement
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    /// Borrow the statement text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take back the statement text
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for CandidateStatement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for CandidateStatement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// A statement that received a SAFE verdict
///
/// Only [`validate`] can construct this type, so holding one proves the statement
/// passed validation. The executor accepts nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeStatement(String);

impl SafeStatement {
    /// Borrow the validated statement text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take back the validated statement text
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Why a statement was classified UNSAFE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeReason {
    /// A denylisted verb appears as a whole word
    DangerousKeyword(&'static str),
    /// The normalized statement does not begin with `SELECT`
    NotASelect,
    /// A statement separator appears before the end of the text
    MultipleStatements,
}

impl UnsafeReason {
    /// Stable reason code for JSON output
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DangerousKeyword(_) => "DANGEROUS_KEYWORD",
            Self::NotASelect => "NOT_A_SELECT",
            Self::MultipleStatements => "MULTIPLE_STATEMENTS",
        }
    }
}

impl fmt::Display for UnsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DangerousKeyword(verb) => write!(f, "statement contains the keyword {verb}"),
            Self::NotASelect => write!(f, "statement is not a SELECT"),
            Self::MultipleStatements => write!(f, "statement contains multiple statements"),
        }
    }
}

/// Validation verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The statement may be executed
    Safe(SafeStatement),
    /// The statement must not be executed
    Unsafe {
        candidate: CandidateStatement,
        reason: UnsafeReason,
    },
}

impl Verdict {
    /// Check whether the verdict is SAFE
    #[must_use]
    pub const fn is_safe(&self) -> bool {
        matches!(self, Self::Safe(_))
    }

    /// Reason for an UNSAFE verdict
    #[must_use]
    pub const fn reason(&self) -> Option<UnsafeReason> {
        match self {
            Self::Safe(_) => None,
            Self::Unsafe { reason, .. } => Some(*reason),
        }
    }
}

/// Validate a candidate statement
///
/// Never fails: UNSAFE is an ordinary verdict, and the caller decides how to surface it.
pub fn validate(candidate: CandidateStatement) -> Verdict {
    match check(candidate.as_str()) {
        Ok(()) => Verdict::Safe(SafeStatement(candidate.into_inner())),
        Err(reason) => Verdict::Unsafe { candidate, reason },
    }
}

/// Classify raw SQL text without taking ownership
///
/// Checks run in a fixed order, so a stacked `SELECT ...; DROP ...` reports
/// `MultipleStatements` and a bare `DROP TABLE` reports `NotASelect`.
pub fn check(sql: &str) -> Result<(), UnsafeReason> {
    let normalized = normalize(sql);

    if normalized.is_empty() {
        return Err(UnsafeReason::NotASelect);
    }

    if has_stacked_statement(&normalized) {
        return Err(UnsafeReason::MultipleStatements);
    }

    if !starts_with_select(&normalized) {
        return Err(UnsafeReason::NotASelect);
    }

    if let Some(verb) = find_dangerous_keyword(&normalized) {
        return Err(UnsafeReason::DangerousKeyword(verb));
    }

    Ok(())
}

/// Normalize SQL for classification
///
/// Strips comments, collapses every whitespace run to a single space, trims, and
/// uppercases. The result is only used for classification, never executed.
#[must_use]
pub fn normalize(sql: &str) -> String {
    strip_comments(sql).split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

/// Strip SQL comments outside of literals
///
/// Handles:
/// - Line comments: `-- comment` (ends at `\n` or `\r`)
/// - Block comments: `/* comment */` (non-nested only)
/// - Single-quoted literals and double-quoted identifiers (doubled quote escapes)
///
/// Anything dialect-dependent stops comment removal; the remainder is kept verbatim.
fn strip_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut result = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        match ch {
            '-' if next == Some('-') => {
                // Line comment: skip until newline (the newline itself is kept)
                while i < chars.len() && chars[i] != '\n' && chars[i] != '\r' {
                    i += 1;
                }
                result.push(' ');
            }
            '/' if next == Some('*') => match block_comment_end(&chars, i) {
                Some(end) => {
                    result.push(' ');
                    i = end;
                }
                None => {
                    result.extend(&chars[i..]);
                    return result;
                }
            },
            '\'' | '"' => {
                let end = quoted_end(&chars, i, ch);
                let literal = &chars[i..end];
                result.extend(literal);
                if literal.contains(&'\\') {
                    // Backslash escapes are dialect- and setting-dependent
                    result.extend(&chars[end..]);
                    return result;
                }
                i = end;
            }
            '`' | '[' => {
                result.extend(&chars[i..]);
                return result;
            }
            '$' if opens_dollar_quote(&chars, i) => {
                result.extend(&chars[i..]);
                return result;
            }
            _ => {
                result.push(ch);
                i += 1;
            }
        }
    }

    result
}

/// Index just past the closing quote, or the end of input if unterminated
fn quoted_end(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Index just past a block comment's `*/`
///
/// Returns `None` for nested comments (PostgreSQL nests, SQLite does not) and for
/// unterminated ones.
fn block_comment_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 2;
    while i < chars.len() {
        match (chars[i], chars.get(i + 1)) {
            ('*', Some('/')) => return Some(i + 2),
            ('/', Some('*')) => return None,
            _ => i += 1,
        }
    }
    None
}

/// Whether `$` at `start` opens a PostgreSQL dollar-quoted string (`$$` or `$tag$`)
fn opens_dollar_quote(chars: &[char], start: usize) -> bool {
    let mut i = start + 1;
    if chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        // $1 is a positional parameter
        return false;
    }
    while let Some(&c) = chars.get(i) {
        if c == '$' {
            return true;
        }
        if !is_word_char(c) {
            return false;
        }
        i += 1;
    }
    false
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn words(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split(|c: char| !is_word_char(c)).filter(|w| !w.is_empty())
}

/// Check for a statement separator anywhere but the final character
fn has_stacked_statement(normalized: &str) -> bool {
    let body = normalized.strip_suffix(';').unwrap_or(normalized);
    body.contains(';')
}

/// Check that the first token is the `SELECT` keyword itself
fn starts_with_select(normalized: &str) -> bool {
    normalized.split(|c: char| !is_word_char(c)).next() == Some("SELECT")
}

/// Find the first denylisted verb that appears as a whole word
fn find_dangerous_keyword(normalized: &str) -> Option<&'static str> {
    words(normalized).find_map(|word| DANGEROUS_KEYWORDS.iter().find(|k| **k == word).copied())
}
