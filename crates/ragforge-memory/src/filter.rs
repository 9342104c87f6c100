use ragforge_core::{RagError, RagResult};

/// A boolean filter over one scalar string field.
///
/// Renders to the vector database's expression language (`kb_id == "a"`,
/// `document_id in ["a", "b"]`); [`Filter::parse`] reads the same subset back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `field == "value"`
    Eq {
        /// Field name.
        field: String,
        /// Expected value.
        value: String,
    },
    /// `field in ["v1", "v2", ...]`
    In {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<String>,
    },
    /// Matches nothing.
    Never,
}

const NEVER_EXPR: &str = "0 == 1";

impl Filter {
    /// Equality for a single value, `IN` for several, [`Filter::Never`] for none.
    pub fn any_of(field: impl Into<String>, values: &[String]) -> Self {
        match values {
            [] => Filter::Never,
            [one] => Filter::Eq {
                field: field.into(),
                value: one.clone(),
            },
            many => Filter::In {
                field: field.into(),
                values: many.to_vec(),
            },
        }
    }

    /// Renders the filter as an expression string.
    pub fn to_expr(&self) -> String {
        match self {
            Filter::Eq { field, value } => format!("{field} == {}", quote(value)),
            Filter::In { field, values } => {
                let list: Vec<String> = values.iter().map(|v| quote(v)).collect();
                format!("{field} in [{}]", list.join(", "))
            }
            Filter::Never => NEVER_EXPR.to_string(),
        }
    }

    /// Whether a row whose `field` holds `value` passes the filter.
    pub fn matches(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        match self {
            Filter::Eq { field, value } => lookup(field).as_deref() == Some(value.as_str()),
            Filter::In { field, values } => match lookup(field) {
                Some(v) => values.iter().any(|x| *x == v),
                None => false,
            },
            Filter::Never => false,
        }
    }

    /// Parses an expression produced by [`Filter::to_expr`].
    pub fn parse(expr: &str) -> RagResult<Self> {
        let expr = expr.trim();
        if expr == NEVER_EXPR {
            return Ok(Filter::Never);
        }
        let bad = || RagError::Validation(format!("unsupported filter expression: {expr}"));

        let field_end = expr
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .ok_or_else(bad)?;
        let field = &expr[..field_end];
        if field.is_empty() {
            return Err(bad());
        }
        let rest = expr[field_end..].trim_start();

        if let Some(rhs) = rest.strip_prefix("==") {
            let (value, tail) = read_quoted(rhs.trim_start()).ok_or_else(bad)?;
            if !tail.trim().is_empty() {
                return Err(bad());
            }
            return Ok(Filter::Eq {
                field: field.to_string(),
                value,
            });
        }

        let rhs = rest
            .strip_prefix("in")
            .or_else(|| rest.strip_prefix("IN"))
            .ok_or_else(bad)?;
        let mut cursor = rhs.trim_start().strip_prefix('[').ok_or_else(bad)?;
        let mut values = Vec::new();
        loop {
            cursor = cursor.trim_start();
            if let Some(after) = cursor.strip_prefix(']') {
                if !after.trim().is_empty() {
                    return Err(bad());
                }
                break;
            }
            let (value, tail) = read_quoted(cursor).ok_or_else(bad)?;
            values.push(value);
            let tail = tail.trim_start();
            cursor = match tail.strip_prefix(',') {
                Some(next) => next,
                None if tail.starts_with(']') => tail,
                None => return Err(bad()),
            };
        }
        Ok(Filter::In {
            field: field.to_string(),
            values,
        })
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Reads one double-quoted string, returning it unescaped and the rest of the input.
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?.1),
            '"' => return Some((out, &body[i + 1..])),
            other => out.push(other),
        }
    }
    None
}
