//! Parameterized SQL statements sent to the warehouse.
//!
//! Statements carry named parameters instead of spliced values. The inline
//! rendering produced by [`Query::cache_key`] exists only to give each bound
//! statement a stable identity (cache keys, logs); it is never executed.

use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    String(String),
    Int64(i64),
    StringArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParam {
    pub name: String,
    pub value: ParamValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    /// Short identifier used in logs and panel errors.
    pub label: String,
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl Query {
    pub fn new(label: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.push(QueryParam {
            name: name.into(),
            value,
        });
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Statement text with every `IN UNNEST(@name)` and `@name` occurrence
    /// replaced by its quoted literal(s).
    pub fn cache_key(&self) -> String {
        let mut text = self.sql.clone();
        // Longest names first so `@decade` never clobbers `@decades`.
        let mut params: Vec<&QueryParam> = self.params.iter().collect();
        params.sort_by_key(|p| std::cmp::Reverse(p.name.len()));
        for p in params {
            let unnest = format!("IN UNNEST(@{})", p.name);
            let rendered = render_literal(&p.value);
            if text.contains(&unnest) {
                text = text.replace(&unnest, &format!("IN ({rendered})"));
            }
            text = text.replace(&format!("@{}", p.name), &rendered);
        }
        text
    }
}

fn render_literal(value: &ParamValue) -> String {
    match value {
        ParamValue::String(s) => quote(s),
        ParamValue::Int64(v) => v.to_string(),
        ParamValue::StringArray(items) => {
            let mut out = String::new();
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}", quote(item));
            }
            out
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}
