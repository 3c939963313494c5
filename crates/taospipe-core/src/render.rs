//! TDengine insert-statement text for a single row.
//!
//! Fragments start with a space so that any number of them can follow the
//! [`INSERT_PREFIX`] to form one multi-table `INSERT`:
//!
//! ```text
//! INSERT INTO `db`.`meters` (`tbname`,`ts`,`v`) VALUES ('d1',1700000000000,1.5) `db`.`d2` USING ...
//! ```

use std::fmt::Write;

use serde_json::Value;

use crate::store::Row;

/// Command prefix shared by every batch statement
pub const INSERT_PREFIX: &str = "INSERT INTO";

/// Backquote an identifier, doubling any embedded backquote.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('`');
    for c in name.chars() {
        if c == '`' {
            out.push('`');
        }
        out.push(c);
    }
    out.push('`');
    out
}

/// Render a value as a SQL literal.
///
/// `null` → `NULL`, numbers and booleans bare, strings single-quoted with
/// `\` and `'` escaped, arrays/objects quoted as JSON text.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_str(s),
        other => quote_str(&other.to_string()),
    }
}

fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn qualified(db: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(db), quote_ident(name))
}

fn push_names<'a>(out: &mut String, names: impl Iterator<Item = &'a String>) {
    out.push('(');
    for (i, name) in names.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote_ident(name));
    }
    out.push(')');
}

fn push_values<'a>(out: &mut String, values: impl Iterator<Item = &'a Value>) {
    out.push('(');
    for (i, value) in values.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&literal(value));
    }
    out.push(')');
}

/// Render one row as a fragment to append after [`INSERT_PREFIX`].
///
/// Without tags the row targets the super table directly and names its
/// subtable through `tbname` (tags may be mixed into `fields`). With tags the
/// subtable is auto-created via `USING ... TAGS`.
pub fn row_fragment(
    db: &str,
    super_table: &str,
    table: &str,
    fields: &Row,
    tags: Option<&Row>,
) -> String {
    let mut out = String::with_capacity(64 + fields.len() * 24);
    out.push(' ');
    match tags {
        Some(tags) if !tags.is_empty() => {
            let _ = write!(
                out,
                "{} USING {} ",
                qualified(db, table),
                qualified(db, super_table)
            );
            push_names(&mut out, tags.keys());
            out.push_str(" TAGS ");
            push_values(&mut out, tags.values());
            out.push(' ');
            push_names(&mut out, fields.keys());
            out.push_str(" VALUES ");
            push_values(&mut out, fields.values());
        }
        _ => {
            out.push_str(&qualified(db, super_table));
            out.push(' ');
            let tbname = "tbname".to_string();
            push_names(&mut out, std::iter::once(&tbname).chain(fields.keys()));
            out.push_str(" VALUES ");
            let table_value = Value::String(table.to_string());
            push_values(
                &mut out,
                std::iter::once(&table_value).chain(fields.values()),
            );
        }
    }
    out
}

/// Complete single-row insert statement for the synchronous path.
pub fn single_insert(
    db: &str,
    super_table: &str,
    table: &str,
    fields: &Row,
    tags: Option<&Row>,
) -> String {
    let mut sql = String::from(INSERT_PREFIX);
    sql.push_str(&row_fragment(db, super_table, table, fields, tags));
    sql
}
