//! Named-parameter rewriting.
//!
//! Postgres takes positional `$n` placeholders; the declarative queries
//! use `:name`. The rewrite collects names in first-appearance order,
//! reuses one ordinal per name, leaves `::type` casts and quoted literals
//! alone, and hands back the ordered name list for binding.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

pub(crate) struct BoundSql {
    pub sql: String,
    /// Parameter names in `$1..$n` order.
    pub names: Vec<String>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) fn rewrite_named(sql: &str) -> BoundSql {
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();

    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ':' => {
                // `::` is a cast, not a parameter.
                if chars.get(i + 1) == Some(&':') {
                    out.push_str("::");
                    i += 2;
                    continue;
                }
                if i > 0 && chars[i - 1] == ':' {
                    out.push(c);
                    i += 1;
                    continue;
                }
                let Some(&next) = chars.get(i + 1) else {
                    out.push(c);
                    i += 1;
                    continue;
                };
                if !is_ident_start(next) {
                    out.push(c);
                    i += 1;
                    continue;
                }

                let mut j = i + 1;
                while j < chars.len() && is_ident(chars[j]) {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().collect();
                let ordinal = match names.iter().position(|n| n == &name) {
                    Some(pos) => pos + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                out.push('$');
                out.push_str(&ordinal.to_string());
                i = j;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    BoundSql { sql: out, names }
}

/// Bind one JSON value onto a query by kind.
///
/// Arrays and objects bind as jsonb; nulls bind as text NULL.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(value),
    }
}
