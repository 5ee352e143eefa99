//! SQL guardrail
//!
//! Every model-generated statement passes through `validate` before it may
//! touch the execution port. The pipeline is fixed; the dangerous-pattern
//! blocklist is a data table so new rules are added without touching the
//! control flow. Validation is pure: the same (sql, catalog, policy) triple
//! always yields the same verdict.

use crate::catalog::{normalize_ident, SchemaCatalog};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref SELECT_HEAD_RE: Regex =
        Regex::new(r"(?is)^\s*(?:WITH\b.*?\bSELECT\b|SELECT\b)").unwrap();
    static ref SQL_TAG_RE: Regex = Regex::new(r"(?i)^sql\s*\n").unwrap();
    static ref LEADING_LINE_COMMENT_RE: Regex = Regex::new(r"^\s*--[^\n]*\n?").unwrap();
    static ref LEADING_BLOCK_COMMENT_RE: Regex = Regex::new(r"(?s)^\s*/\*.*?\*/").unwrap();
    static ref SYSTEM_OBJECT_RE: Regex = Regex::new(
        r"(?i)\b(sqlite_master|sqlite_temp_master|sqlite_schema|sqlite_sequence|pragma_\w+|information_schema\s*\.\s*\w+|pg_catalog\s*\.\s*\w+)"
    )
    .unwrap();
    static ref FROM_JOIN_RE: Regex = Regex::new(r"(?i)\b(?:from|join)\b").unwrap();
    static ref CTE_NAME_RE: Regex = Regex::new(
        r#"(?i)(?:\bwith\s+(?:recursive\s+)?|,\s*)([A-Za-z_"`\[][\w"`\[\]]*)\s*(?:\([^)]*\)\s*)?as\s*\("#
    )
    .unwrap();
    static ref UNION_RE: Regex = Regex::new(r"(?i)\bunion\b").unwrap();
    static ref RECURSIVE_RE: Regex = Regex::new(r"(?i)\bwith\s+recursive\b").unwrap();
    static ref LIMIT_RE: Regex = Regex::new(r"(?i)\blimit\s+(\d+)").unwrap();
    static ref DEFAULT_BLOCKLIST: Vec<BlockRule> = vec![
        BlockRule::new("file_access", r"(?i)\binto\s+(outfile|dumpfile)\b|\bload_file\s*\("),
        BlockRule::new("stacked_probe", r";\s*--"),
        BlockRule::new("sleep_probe", r"(?i)\b(sleep|benchmark|pg_sleep)\s*\("),
    ];
}

/// SQL keywords that terminate a FROM-clause table list.
const TABLE_LIST_STOPWORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "natural", "on", "using", "group",
    "order", "limit", "having", "union", "intersect", "except", "window", "as",
];

/// One blocklist entry: a reason code and the pattern that triggers it.
#[derive(Debug)]
pub struct BlockRule {
    pub code: &'static str,
    pub pattern: Regex,
}

impl BlockRule {
    fn new(code: &'static str, pattern: &str) -> Self {
        Self {
            code,
            pattern: Regex::new(pattern).unwrap(),
        }
    }
}

/// Default dangerous-fragment table. Exposed so callers and tests can
/// extend or replace it via [`validate_with_rules`].
pub fn default_blocklist() -> &'static [BlockRule] {
    &DEFAULT_BLOCKLIST
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailPolicy {
    /// LIMIT appended when the statement has none.
    pub default_row_limit: u64,
    /// Hard ceiling; larger requested limits are rewritten down, not rejected.
    pub max_row_limit: u64,
    /// Permit references to engine catalog tables/views.
    pub allow_system_tables: bool,
    /// UNION occurrences beyond this count are treated as probing.
    pub max_union_count: u32,
    /// `WITH RECURSIVE` occurrences allowed (0 = none).
    pub max_recursive_ctes: u32,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            default_row_limit: 500,
            max_row_limit: 10_000,
            allow_system_tables: false,
            max_union_count: 2,
            max_recursive_ctes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmptySql,
    NonSelect,
    CommentInjection,
    MultiStatement,
    SystemTableAccess,
    UnknownTable,
    StackedUnion,
    RecursiveCte,
    /// A blocklist rule fired; carries the rule's reason code.
    Blocked(String),
}

impl RejectReason {
    pub fn code(&self) -> &str {
        match self {
            RejectReason::EmptySql => "empty_sql",
            RejectReason::NonSelect => "non_select",
            RejectReason::CommentInjection => "comment_injection",
            RejectReason::MultiStatement => "multi_statement",
            RejectReason::SystemTableAccess => "system_table_access",
            RejectReason::UnknownTable => "unknown_table",
            RejectReason::StackedUnion => "stacked_union",
            RejectReason::RecursiveCte => "recursive_cte",
            RejectReason::Blocked(code) => code,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of validation. Acceptance always carries the normalized SQL and
/// the row limit actually in effect; there is no partial acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuardrailVerdict {
    Accept { sql: String, limit: u64 },
    Reject { reason: RejectReason, fragment: String },
}

impl GuardrailVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, GuardrailVerdict::Accept { .. })
    }

    fn reject(reason: RejectReason, fragment: impl Into<String>) -> Self {
        GuardrailVerdict::Reject {
            reason,
            fragment: fragment.into(),
        }
    }
}

/// Validate a model-generated statement with the default blocklist.
pub fn validate(sql: &str, catalog: &SchemaCatalog, policy: &GuardrailPolicy) -> GuardrailVerdict {
    validate_with_rules(sql, catalog, policy, default_blocklist())
}

/// Full pipeline, short-circuiting on the first failure.
pub fn validate_with_rules(
    sql: &str,
    catalog: &SchemaCatalog,
    policy: &GuardrailPolicy,
    rules: &[BlockRule],
) -> GuardrailVerdict {
    let cleaned = strip_wrapping(sql);
    if cleaned.is_empty() {
        return GuardrailVerdict::reject(RejectReason::EmptySql, "");
    }

    // 1. statement shape: exactly one statement starting SELECT / WITH..SELECT
    if !SELECT_HEAD_RE.is_match(&cleaned) {
        let head = cleaned.split_whitespace().next().unwrap_or("");
        return GuardrailVerdict::reject(RejectReason::NonSelect, head);
    }

    // 2. comment markers surviving past the first token are a smuggling vector
    if let Some(fragment) = find_outside_literals(&cleaned, &["--", "/*"]) {
        return GuardrailVerdict::reject(RejectReason::CommentInjection, fragment);
    }

    // 3. statement separator outside a string literal
    if let Some(fragment) = find_outside_literals(&cleaned, &[";"]) {
        return GuardrailVerdict::reject(RejectReason::MultiStatement, fragment);
    }

    // steps 4-6 scan with string literals blanked out, so quoted data can
    // never masquerade as an identifier or a dangerous fragment
    let scannable = blank_literals(&cleaned);

    // 4. engine catalog objects
    if !policy.allow_system_tables {
        if let Some(m) = SYSTEM_OBJECT_RE.find(&scannable) {
            return GuardrailVerdict::reject(RejectReason::SystemTableAccess, m.as_str());
        }
    }

    // 5. every table reference must resolve; columns stay best-effort
    let cte_names: Vec<String> = CTE_NAME_RE
        .captures_iter(&scannable)
        .map(|c| normalize_ident(&c[1]))
        .collect();
    for table in extract_table_refs(&scannable) {
        let normalized = normalize_ident(&table);
        if cte_names.contains(&normalized) {
            continue;
        }
        if policy.allow_system_tables && is_system_name(&normalized) {
            continue;
        }
        // a qualified name like main.orders resolves by its last segment
        let bare = normalized.rsplit('.').next().unwrap_or(&normalized);
        if !catalog.contains_table(&normalized) && !catalog.contains_table(bare) {
            return GuardrailVerdict::reject(RejectReason::UnknownTable, table);
        }
    }

    // 6. dangerous-pattern blocklist, then the two count-driven checks
    for rule in rules {
        if let Some(m) = rule.pattern.find(&scannable) {
            return GuardrailVerdict::reject(
                RejectReason::Blocked(rule.code.to_string()),
                m.as_str(),
            );
        }
    }
    let unions = UNION_RE.find_iter(&scannable).count();
    if unions > policy.max_union_count as usize {
        return GuardrailVerdict::reject(RejectReason::StackedUnion, format!("{unions} unions"));
    }
    let recursive = RECURSIVE_RE.find_iter(&scannable).count();
    if recursive > policy.max_recursive_ctes as usize {
        return GuardrailVerdict::reject(RejectReason::RecursiveCte, "WITH RECURSIVE");
    }

    // 7. limit normalization; never rejects
    normalize_limit(cleaned, policy)
}

fn normalize_limit(sql: String, policy: &GuardrailPolicy) -> GuardrailVerdict {
    let ceiling = policy.max_row_limit.max(1);
    // the outermost LIMIT is the last one in statement order
    if let Some(caps) = LIMIT_RE.captures_iter(&sql).last() {
        let m = caps.get(1).unwrap();
        let requested: u64 = m.as_str().parse().unwrap_or(u64::MAX);
        let effective = requested.clamp(1, ceiling);
        if effective == requested {
            return GuardrailVerdict::Accept {
                sql,
                limit: effective,
            };
        }
        let mut rewritten = String::with_capacity(sql.len());
        rewritten.push_str(&sql[..m.start()]);
        rewritten.push_str(&effective.to_string());
        rewritten.push_str(&sql[m.end()..]);
        GuardrailVerdict::Accept {
            sql: rewritten,
            limit: effective,
        }
    } else {
        let effective = policy.default_row_limit.clamp(1, ceiling);
        GuardrailVerdict::Accept {
            sql: format!("{sql} LIMIT {effective}"),
            limit: effective,
        }
    }
}

/// Drop the wrappers models put around SQL: markdown fences, a leading
/// `sql` tag, leading comments/whitespace, trailing semicolons.
fn strip_wrapping(sql: &str) -> String {
    let mut s = sql.trim();
    if s.starts_with("```") {
        s = s.trim_start_matches('`');
        if let Some(rest) = s.strip_prefix("sql") {
            s = rest;
        }
        s = s.trim_end_matches('`');
    }
    let mut s = s.trim_matches('`').trim().to_string();
    if let Some(m) = SQL_TAG_RE.find(&s) {
        s = s[m.end()..].to_string();
    }
    loop {
        let before = s.len();
        s = LEADING_LINE_COMMENT_RE.replace(&s, "").into_owned();
        s = LEADING_BLOCK_COMMENT_RE.replace(&s, "").into_owned();
        s = s.trim_start().to_string();
        if s.len() == before {
            break;
        }
    }
    while s.ends_with(';') {
        s.pop();
        s = s.trim_end().to_string();
    }
    s.trim().to_string()
}

/// Find the first occurrence of any needle outside single-quoted string
/// literals and double-quoted identifiers. Returns a short fragment around
/// the hit for the verdict.
fn find_outside_literals(sql: &str, needles: &[&str]) -> Option<String> {
    let bytes = sql.as_bytes();
    let mut in_quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match in_quote {
            Some(q) => {
                if b == q {
                    // '' escapes a quote inside a literal
                    if q == b'\'' && bytes.get(i + 1) == Some(&b'\'') {
                        i += 1;
                    } else {
                        in_quote = None;
                    }
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    in_quote = Some(b);
                } else {
                    for needle in needles {
                        if sql[i..].starts_with(needle) {
                            let end = (i + 16).min(sql.len());
                            return Some(sql[i..end].to_string());
                        }
                    }
                }
            }
        }
        i += 1;
    }
    None
}

/// Replace the contents of single-quoted string literals with spaces,
/// preserving length. Double-quoted text is left alone: in SQL those are
/// identifiers and the reference checks need to see them.
fn blank_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match in_quote {
            Some(q) => {
                if c == q {
                    if q == '\'' && chars.peek() == Some(&'\'') {
                        chars.next();
                        out.push(' ');
                        out.push(' ');
                    } else {
                        in_quote = None;
                        out.push(q);
                    }
                } else {
                    out.push(' ');
                }
            }
            None => {
                if c == '\'' {
                    in_quote = Some('\'');
                }
                out.push(c);
            }
        }
    }
    out
}

fn is_system_name(name: &str) -> bool {
    name.starts_with("sqlite_")
        || name.starts_with("pragma_")
        || name.starts_with("information_schema")
        || name.starts_with("pg_catalog")
}

/// Collect table names referenced after FROM / JOIN, walking comma lists
/// and skipping derived tables (subqueries).
fn extract_table_refs(sql: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for m in FROM_JOIN_RE.find_iter(sql) {
        let mut rest = sql[m.end()..].trim_start();
        loop {
            if rest.starts_with('(') {
                break; // derived table; its inner FROM is matched separately
            }
            let Some(ident) = take_identifier(rest) else {
                break;
            };
            rest = rest[ident.len()..].trim_start();
            refs.push(ident);

            // optional alias: AS name, or a bare word that isn't a keyword
            if let Some(stripped) = strip_keyword(rest, "as") {
                if let Some(alias) = take_identifier(stripped.trim_start()) {
                    rest = stripped.trim_start()[alias.len()..].trim_start();
                }
            } else if let Some(word) = take_identifier(rest) {
                if !TABLE_LIST_STOPWORDS.contains(&word.to_lowercase().as_str()) {
                    rest = rest[word.len()..].trim_start();
                }
            }

            if let Some(after_comma) = rest.strip_prefix(',') {
                rest = after_comma.trim_start();
            } else {
                break;
            }
        }
    }
    refs
}

/// Read one identifier (optionally quoted, optionally dotted) off the front.
fn take_identifier(s: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = s.char_indices().peekable();
    match chars.peek() {
        Some((_, c)) if c.is_alphabetic() || *c == '_' || *c == '"' || *c == '`' || *c == '[' => {}
        _ => return None,
    }
    let mut quote: Option<char> = None;
    for (_, c) in chars {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q || (q == '[' && c == ']') {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '`' || c == '[' {
                    quote = Some(if c == '[' { '[' } else { c });
                    out.push(c);
                } else if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
                    out.push(c);
                } else {
                    break;
                }
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    if s.len() >= keyword.len() && s[..keyword.len()].eq_ignore_ascii_case(keyword) {
        let rest = &s[keyword.len()..];
        if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace()) {
            return Some(rest);
        }
    }
    None
}
