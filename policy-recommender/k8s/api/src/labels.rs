use std::{collections::BTreeMap, str::FromStr, sync::Arc};

/// A shared, immutable label map.
#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

/// A parsed namespace-selector expression.
///
/// Supports conjunctions of equality and key-presence tests:
/// `team == 'payments' && env != 'dev' && has(owner)`. The empty string and
/// `all()` match every label set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    exprs: Vec<Expression>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Expression {
    Eq(String, String),
    NotEq(String, String),
    Has(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty clause in selector")]
    EmptyClause,

    #[error("expected `key == 'value'`, `key != 'value'`, or `has(key)`: {0}")]
    InvalidClause(String),

    #[error("expected a quoted value: {0}")]
    UnquotedValue(String),
}

// === impl Selector ===

impl Selector {
    pub fn matches(&self, labels: &Labels) -> bool {
        self.exprs.iter().all(|expr| expr.matches(labels.as_ref()))
    }
}

impl FromStr for Selector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "all()" {
            return Ok(Self::default());
        }
        let exprs = s
            .split("&&")
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { exprs })
    }
}

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self {
            Self::Eq(key, value) => labels.get(key) == Some(value),
            Self::NotEq(key, value) => labels.get(key) != Some(value),
            Self::Has(key) => labels.contains_key(key),
        }
    }
}

fn parse_clause(clause: &str) -> Result<Expression, ParseError> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Err(ParseError::EmptyClause);
    }

    if let Some(key) = clause
        .strip_prefix("has(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidClause(clause.to_string()));
        }
        return Ok(Expression::Has(key.to_string()));
    }

    if let Some((key, value)) = clause.split_once("==") {
        return Ok(Expression::Eq(key.trim().to_string(), unquote(value)?));
    }
    if let Some((key, value)) = clause.split_once("!=") {
        return Ok(Expression::NotEq(key.trim().to_string(), unquote(value)?));
    }

    Err(ParseError::InvalidClause(clause.to_string()))
}

fn unquote(value: &str) -> Result<String, ParseError> {
    let value = value.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(inner.to_string());
        }
    }
    Err(ParseError::UnquotedValue(value.to_string()))
}

// === impl Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        Self(Arc::new(labels.unwrap_or_default()))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
