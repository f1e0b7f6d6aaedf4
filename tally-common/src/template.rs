//! Typed SQL templates.
//!
//! A [`Template`] declares the backend it runs on and every parameter it takes, with a kind.
//! [`Template::bind`] checks a parameter set against that declaration before anything reaches a
//! backend, and produces a [`Statement`]. Backends render statements in their own dialect.
//!
//! Placeholders are written `{{name}}`. A body may hold several statements separated by `;`.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Which backend a template targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Relational store, real transactions per statement batch.
    Transactional,
    /// Federated query engine over partitioned external tables. No cross-statement transactions.
    Distributed,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Transactional => "transactional",
            Backend::Distributed => "distributed",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Inlined verbatim after validation (schema/table/column names).
    Identifier,
    IdentifierList,
    Text,
    TextList,
    Int,
    IntList,
    Date,
    Decimal,
    Uuid,
    UuidList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub name: &'static str,
    pub backend: Backend,
    pub body: &'static str,
    pub params: &'static [ParamSpec],
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Identifier(String),
    IdentifierList(Vec<String>),
    Text(String),
    TextList(Vec<String>),
    Int(i64),
    IntList(Vec<i64>),
    Date(NaiveDate),
    Decimal(BigDecimal),
    Uuid(Uuid),
    UuidList(Vec<Uuid>),
}

impl ParamValue {
    pub fn ident(name: impl Into<String>) -> Self {
        ParamValue::Identifier(name.into())
    }

    pub fn idents<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParamValue::IdentifierList(names.into_iter().map(Into::into).collect())
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Identifier(_) => ParamKind::Identifier,
            ParamValue::IdentifierList(_) => ParamKind::IdentifierList,
            ParamValue::Text(_) => ParamKind::Text,
            ParamValue::TextList(_) => ParamKind::TextList,
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::IntList(_) => ParamKind::IntList,
            ParamValue::Date(_) => ParamKind::Date,
            ParamValue::Decimal(_) => ParamKind::Decimal,
            ParamValue::Uuid(_) => ParamKind::Uuid,
            ParamValue::UuidList(_) => ParamKind::UuidList,
        }
    }

    /// JSON view used for error context and logs. Decimals are rendered as strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ParamValue::Identifier(s) | ParamValue::Text(s) => json!(s),
            ParamValue::IdentifierList(v) | ParamValue::TextList(v) => json!(v),
            ParamValue::Int(i) => json!(i),
            ParamValue::IntList(v) => json!(v),
            ParamValue::Date(d) => json!(d.to_string()),
            ParamValue::Decimal(d) => json!(d.to_string()),
            ParamValue::Uuid(u) => json!(u.to_string()),
            ParamValue::UuidList(v) => json!(v.iter().map(|u| u.to_string()).collect::<Vec<_>>()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(v: NaiveDate) -> Self {
        ParamValue::Date(v)
    }
}

impl From<BigDecimal> for ParamValue {
    fn from(v: BigDecimal) -> Self {
        ParamValue::Decimal(v)
    }
}

impl From<Uuid> for ParamValue {
    fn from(v: Uuid) -> Self {
        ParamValue::Uuid(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::TextList(v)
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        ParamValue::IntList(v)
    }
}

impl From<Vec<Uuid>> for ParamValue {
    fn from(v: Vec<Uuid>) -> Self {
        ParamValue::UuidList(v)
    }
}

/// Parameter set under construction. Insertion order is kept; setting a name twice replaces it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Vec<(&'static str, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn to_json(&self) -> serde_json::Value {
        params_to_json(&self.values)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error("template {template}: missing parameter {name}")]
    Missing {
        template: &'static str,
        name: &'static str,
    },
    #[error("template {template}: unexpected parameter {name}")]
    Unexpected {
        template: &'static str,
        name: &'static str,
    },
    #[error("template {template}: parameter {name} expects {expected:?}, got {actual:?}")]
    Kind {
        template: &'static str,
        name: &'static str,
        expected: ParamKind,
        actual: ParamKind,
    },
    #[error("template {template}: parameter {name} is not a valid identifier: {value:?}")]
    Identifier {
        template: &'static str,
        name: &'static str,
        value: String,
    },
    #[error("template {template}: placeholder {name} has no bound value")]
    Unbound {
        template: &'static str,
        name: String,
    },
}

/// A template with a validated parameter set, ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub template: &'static str,
    pub backend: Backend,
    pub body: &'static str,
    params: Vec<(&'static str, ParamValue)>,
}

impl Statement {
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn params(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> {
        self.params.iter().map(|(n, v)| (*n, v))
    }

    /// Template name plus bound parameters, for logs and error context.
    pub fn context(&self) -> serde_json::Value {
        let mut ctx = params_to_json(&self.params);
        if let Some(obj) = ctx.as_object_mut() {
            obj.insert("template".to_string(), serde_json::json!(self.template));
        }
        ctx
    }

    /// The individual statements of the body, in order.
    pub fn parts(&self) -> Vec<&'static str> {
        split_statements(self.body)
    }
}

impl Template {
    /// Validate `params` against the declaration and produce a statement.
    pub fn bind(&self, params: Params) -> Result<Statement, BindError> {
        for (name, _) in &params.values {
            if !self.params.iter().any(|spec| spec.name == *name) {
                return Err(BindError::Unexpected {
                    template: self.name,
                    name: *name,
                });
            }
        }

        let mut bound = Vec::with_capacity(self.params.len());
        for spec in self.params {
            let value = params.get(spec.name).ok_or(BindError::Missing {
                template: self.name,
                name: spec.name,
            })?;
            if value.kind() != spec.kind {
                return Err(BindError::Kind {
                    template: self.name,
                    name: spec.name,
                    expected: spec.kind,
                    actual: value.kind(),
                });
            }
            let bad_ident = match value {
                ParamValue::Identifier(s) => (!is_valid_identifier(s)).then(|| s.clone()),
                ParamValue::IdentifierList(v) => v.iter().find(|s| !is_valid_identifier(s)).cloned(),
                _ => None,
            };
            if let Some(value) = bad_ident {
                return Err(BindError::Identifier {
                    template: self.name,
                    name: spec.name,
                    value,
                });
            }
            bound.push((spec.name, value.clone()));
        }

        Ok(Statement {
            template: self.name,
            backend: self.backend,
            body: self.body,
            params: bound,
        })
    }

    /// Names of all `{{placeholders}}` used in the body.
    pub fn placeholders(&self) -> BTreeSet<&'static str> {
        placeholders(self.body).into_iter().map(|p| p.name).collect()
    }
}

fn params_to_json(values: &[(&'static str, ParamValue)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in values {
        map.insert(name.to_string(), value.to_json());
    }
    serde_json::Value::Object(map)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder<'a> {
    pub start: usize,
    pub end: usize,
    pub name: &'a str,
}

/// Locate `{{name}}` placeholders. Whitespace inside the braces is ignored.
pub fn placeholders(text: &str) -> Vec<Placeholder<'_>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(open) = text[cursor..].find("{{") {
        let start = cursor + open;
        let Some(close) = text[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let name = text[start + 2..end - 2].trim();
        if is_valid_identifier(name) {
            out.push(Placeholder { start, end, name });
        }
        cursor = end;
    }
    out
}

/// Replace every placeholder in `text` with whatever `render` returns for its name.
pub fn render_placeholders<F>(text: &str, mut render: F) -> Result<String, BindError>
where
    F: FnMut(&str) -> Result<String, BindError>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for p in placeholders(text) {
        out.push_str(&text[last..p.start]);
        out.push_str(&render(p.name)?);
        last = p.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Split a script on `;`, ignoring semicolons inside quotes and `--` comments. Blank parts are dropped.
pub fn split_statements(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<u8> = None;
    let mut in_comment = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_comment {
            if b == b'\n' {
                in_comment = false;
            }
        } else if let Some(q) = quote {
            if b == q {
                quote = None;
            }
        } else if b == b'\'' || b == b'"' {
            quote = Some(b);
        } else if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            in_comment = true;
        } else if b == b';' {
            parts.push(&body[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&body[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty() && !is_comment_only(p))
        .collect()
}

fn is_comment_only(part: &str) -> bool {
    part.lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with("--"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: Template = Template {
        name: "sample",
        backend: Backend::Transactional,
        body: "DELETE FROM {{schema}}.t WHERE id = ANY({{ids}}); INSERT INTO {{schema}}.t SELECT {{ id_col }}",
        params: &[
            ParamSpec::new("schema", ParamKind::Identifier),
            ParamSpec::new("ids", ParamKind::IntList),
            ParamSpec::new("id_col", ParamKind::Identifier),
        ],
    };

    fn good() -> Params {
        Params::new()
            .with("schema", ParamValue::ident("acct10001"))
            .with("ids", vec![3_i64, 1, 3])
            .with("id_col", ParamValue::ident("bill_id"))
    }

    #[test]
    fn bind_accepts_declared_parameters() {
        let stmt = SAMPLE.bind(good()).unwrap();
        assert_eq!(stmt.template, "sample");
        assert_eq!(stmt.param("ids"), Some(&ParamValue::IntList(vec![3, 1, 3])));
        assert_eq!(stmt.parts().len(), 2);
        assert_eq!(stmt.context()["template"], "sample");
        assert_eq!(stmt.context()["schema"], "acct10001");
    }

    #[test]
    fn bind_rejects_missing_unknown_and_mistyped() {
        let missing = Params::new().with("schema", ParamValue::ident("s"));
        assert!(matches!(
            SAMPLE.bind(missing),
            Err(BindError::Missing { name: "ids", .. })
        ));

        let unknown = good().with("extra", "x");
        assert!(matches!(
            SAMPLE.bind(unknown),
            Err(BindError::Unexpected { name: "extra", .. })
        ));

        let mistyped = good().with("ids", "1,2");
        assert!(matches!(
            SAMPLE.bind(mistyped),
            Err(BindError::Kind {
                expected: ParamKind::IntList,
                actual: ParamKind::Text,
                ..
            })
        ));

        let injected = good().with("schema", ParamValue::ident("acct; DROP TABLE x"));
        assert!(matches!(
            SAMPLE.bind(injected),
            Err(BindError::Identifier { name: "schema", .. })
        ));
    }

    #[test]
    fn placeholders_are_found_and_rendered() {
        let names = SAMPLE.placeholders();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["id_col", "ids", "schema"]
        );

        let out = render_placeholders("a {{x}} b {{ y }} {{not valid}}", |n| Ok(n.to_uppercase())).unwrap();
        assert_eq!(out, "a X b Y {{not valid}}");
    }

    #[test]
    fn split_respects_quotes_and_comments() {
        let parts = split_statements(
            "SELECT ';' AS a;\n-- trailing; comment\nSELECT \"x;y\" FROM t;\n  ;\n-- only comment\n",
        );
        assert_eq!(parts, vec!["SELECT ';' AS a", "-- trailing; comment\nSELECT \"x;y\" FROM t"]);
    }

    #[test]
    fn identifiers() {
        assert!(is_valid_identifier("reporting_azurecostentrybill"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("a.b"));
        assert!(!is_valid_identifier(""));
    }
}
