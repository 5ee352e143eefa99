//! Schema catalog
//!
//! Builds a normalized table/column catalog from a schema source: either raw
//! DDL text or a structured JSON schema document. Format detection is
//! explicit; input that is neither fails loudly instead of being guessed at.

use crate::error::{AskDbError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

lazy_static! {
    static ref CREATE_TABLE_RE: Regex = Regex::new(
        r#"(?is)\bCREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([A-Za-z_"`\[][\w."`\[\]$ ]*?)\s*\("#
    )
    .unwrap();
}

/// Keywords that open a table-level constraint rather than a column.
const CONSTRAINT_STARTERS: &[&str] = &[
    "primary", "foreign", "unique", "check", "constraint", "key", "index",
];

/// Keywords that end the type portion of a column definition.
const COLUMN_TRAILERS: &[&str] = &[
    "primary", "not", "null", "default", "unique", "references", "check",
    "collate", "generated", "as", "constraint", "autoincrement",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// Columns in declared order.
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        let wanted = normalize_ident(name);
        self.columns.iter().find(|c| c.name == wanted)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Immutable snapshot of the target schema. Identifiers are lowercased on
/// the way in, matching SQLite's case-insensitive identifier rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&normalize_ident(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(&normalize_ident(name))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Prompt-facing rendering: one `table(col TYPE, ...)` line per table.
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.tables.len());
        for table in self.tables.values() {
            let cols: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    if c.data_type.is_empty() {
                        c.name.clone()
                    } else {
                        format!("{} {}", c.name, c.data_type)
                    }
                })
                .collect();
            lines.push(format!("{}({})", table.name, cols.join(", ")));
        }
        lines.join("\n")
    }

    fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }
}

/// Strip quoting (`"x"`, `` `x` ``, `[x]`) and lowercase an identifier.
pub fn normalize_ident(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']' || c == '\'')
        .to_lowercase()
}

/// Structured schema document: `{"tables": [{"name": ..., "columns":
/// [{"name": ..., "type": ...}]}]}`, or the bare table array.
#[derive(Debug, Deserialize)]
struct SchemaDoc {
    tables: Vec<TableDoc>,
}

#[derive(Debug, Deserialize)]
struct TableDoc {
    name: String,
    #[serde(default)]
    columns: Vec<ColumnDoc>,
}

#[derive(Debug, Deserialize)]
struct ColumnDoc {
    name: String,
    #[serde(default, rename = "type")]
    data_type: String,
}

/// Build a catalog from DDL text or a structured JSON document.
///
/// Pure and idempotent: identical input yields an identical catalog, so
/// callers may cache the result for a schema snapshot.
pub fn build_catalog(source: &str) -> Result<SchemaCatalog> {
    let trimmed = source.trim_start();
    let catalog = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        parse_structured(trimmed)?
    } else if CREATE_TABLE_RE.is_match(source) {
        parse_ddl(source)
    } else {
        return Err(AskDbError::SchemaEmpty(
            "schema source is neither a JSON schema document nor DDL with CREATE TABLE statements"
                .to_string(),
        ));
    };

    if catalog.is_empty() {
        return Err(AskDbError::SchemaEmpty(
            "no tables discovered in schema source".to_string(),
        ));
    }
    Ok(catalog)
}

fn parse_structured(source: &str) -> Result<SchemaCatalog> {
    let tables: Vec<TableDoc> = if source.starts_with('[') {
        serde_json::from_str(source)?
    } else {
        let doc: SchemaDoc = serde_json::from_str(source)?;
        doc.tables
    };

    let mut catalog = SchemaCatalog::default();
    for table in tables {
        catalog.insert(TableSchema {
            name: normalize_ident(&table.name),
            columns: table
                .columns
                .into_iter()
                .map(|c| Column {
                    name: normalize_ident(&c.name),
                    data_type: c.data_type.trim().to_uppercase(),
                })
                .collect(),
        });
    }
    Ok(catalog)
}

/// Tolerant DDL scan: CREATE TABLE statements are parsed, everything else
/// (indexes, views, inserts, comments) is skipped without error.
fn parse_ddl(source: &str) -> SchemaCatalog {
    let mut catalog = SchemaCatalog::default();

    for caps in CREATE_TABLE_RE.captures_iter(source) {
        let name = normalize_ident(&caps[1]);
        let open = caps.get(0).unwrap().end() - 1;
        let Some(body) = balanced_parens(&source[open..]) else {
            continue;
        };
        let columns = parse_column_defs(body);
        if !name.is_empty() {
            catalog.insert(TableSchema { name, columns });
        }
    }
    catalog
}

/// Return the text between the opening paren at `s[0]` and its matching
/// close, or None if the parens never balance.
fn balanced_parens(s: &str) -> Option<&str> {
    debug_assert!(s.starts_with('('));
    let mut depth = 0usize;
    for (idx, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[1..idx]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_column_defs(body: &str) -> Vec<Column> {
    let mut columns = Vec::new();
    for def in split_top_level(body) {
        let def = def.trim();
        if def.is_empty() {
            continue;
        }
        let first = def
            .split_whitespace()
            .next()
            .map(|w| w.to_lowercase())
            .unwrap_or_default();
        if CONSTRAINT_STARTERS.contains(&first.trim_matches('"').trim_matches('`')) {
            continue;
        }

        let mut words = def.split_whitespace();
        let Some(raw_name) = words.next() else { continue };
        let mut type_words = Vec::new();
        for word in words {
            let bare = word.to_lowercase();
            if COLUMN_TRAILERS.contains(&bare.as_str()) {
                break;
            }
            type_words.push(word.to_uppercase());
        }
        columns.push(Column {
            name: normalize_ident(raw_name),
            data_type: type_words.join(" "),
        });
    }
    columns
}

/// Split on commas outside parentheses and quotes.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;
    let mut start = 0usize;
    for (idx, ch) in body.char_indices() {
        match (ch, in_quote) {
            (q, Some(open)) if q == open => in_quote = None,
            (_, Some(_)) => {}
            ('\'' | '"' | '`', None) => in_quote = Some(ch),
            ('(', None) => depth += 1,
            (')', None) => depth = depth.saturating_sub(1),
            (',', None) if depth == 0 => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const DDL: &str = r#"
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            amount DECIMAL(10,2) DEFAULT 0,
            created_at TEXT,
            PRIMARY KEY (id)
        );
        CREATE INDEX idx_orders_customer ON orders(customer_id);
        CREATE TABLE "Customers" (name VARCHAR(80), email TEXT);
    "#;

    #[test]
    fn parses_ddl_tables_and_columns() {
        let catalog = build_catalog(DDL).unwrap();
        assert_eq!(catalog.len(), 2);

        let orders = catalog.table("orders").unwrap();
        let names: Vec<&str> = orders.column_names().collect();
        assert_eq!(names, vec!["id", "customer_id", "amount", "created_at"]);
        assert_eq!(orders.column("amount").unwrap().data_type, "DECIMAL(10,2)");

        // quoted identifier is normalized
        assert!(catalog.contains_table("customers"));
        assert!(catalog.contains_table("CUSTOMERS"));
    }

    #[test]
    fn skips_unknown_statements() {
        let ddl = "PRAGMA foreign_keys=ON;\nCREATE VIEW v AS SELECT 1;\nCREATE TABLE t (a INT);";
        let catalog = build_catalog(ddl).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains_table("t"));
    }

    #[test]
    fn parses_structured_document() {
        let doc = r#"{"tables": [{"name": "Orders", "columns":
            [{"name": "Id", "type": "integer"}, {"name": "amount", "type": "real"}]}]}"#;
        let catalog = build_catalog(doc).unwrap();
        let orders = catalog.table("orders").unwrap();
        assert_eq!(orders.column("id").unwrap().data_type, "INTEGER");
    }

    #[test]
    fn empty_schema_is_fatal() {
        let err = build_catalog("SELECT 1;").unwrap_err();
        assert!(matches!(err, AskDbError::SchemaEmpty(_)));

        let err = build_catalog(r#"{"tables": []}"#).unwrap_err();
        assert!(matches!(err, AskDbError::SchemaEmpty(_)));
    }

    #[test]
    fn idempotent_for_identical_input() {
        let a = build_catalog(DDL).unwrap();
        let b = build_catalog(DDL).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.summary(), b.summary());
    }
}
