//! Read filters over resource records.
//!
//! A [`Filter`] can only name the fields and operators listed here, so a
//! value of this type is already validated. Untrusted filter documents go
//! through [`Filter::parse`], which rejects every token outside the
//! allow-list with a [`FilterError`] instead of dropping it.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::types::ResourceRecord;
use crate::util::resolve_path;

/// Maximum nesting of filter documents and operator objects.
pub const MAX_DEPTH: usize = 32;

// ════════════════════════════════════════════════════════════════
//  Errors
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("disallowed field in filter: {0}")]
    Field(String),

    #[error("disallowed operator in filter: {0}")]
    Operator(String),

    #[error("invalid operand for {operator}: {reason}")]
    Operand { operator: String, reason: &'static str },

    #[error("filter must be a JSON object")]
    NotAnObject,

    #[error("filter nested deeper than {0} levels")]
    TooDeep(usize),
}

impl FilterError {
    /// The rejected field or operator, if the error names one.
    pub fn token(&self) -> Option<&str> {
        match self {
            FilterError::Field(t) | FilterError::Operator(t) => Some(t),
            FilterError::Operand { operator, .. } => Some(operator),
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Field
// ════════════════════════════════════════════════════════════════

/// A queryable field of a [`ResourceRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Id,
    Tombstoned,
    UpdatedAt,
    /// The payload, or a dotted path inside it (empty = whole payload).
    Payload(String),
}

impl Field {
    pub fn parse(name: &str) -> Result<Self, FilterError> {
        match name {
            "id" => Ok(Field::Id),
            "tombstoned" => Ok(Field::Tombstoned),
            "updatedAt" => Ok(Field::UpdatedAt),
            "payload" => Ok(Field::Payload(String::new())),
            _ => {
                let path = name
                    .strip_prefix("payload.")
                    .ok_or_else(|| FilterError::Field(name.to_string()))?;
                let well_formed = path
                    .split('.')
                    .all(|seg| !seg.is_empty() && !seg.starts_with('$'));
                if !well_formed {
                    return Err(FilterError::Field(name.to_string()));
                }
                Ok(Field::Payload(path.to_string()))
            }
        }
    }

    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Field::Id => Cow::Borrowed("id"),
            Field::Tombstoned => Cow::Borrowed("tombstoned"),
            Field::UpdatedAt => Cow::Borrowed("updatedAt"),
            Field::Payload(path) if path.is_empty() => Cow::Borrowed("payload"),
            Field::Payload(path) => Cow::Owned(format!("payload.{path}")),
        }
    }

    fn value_of<'a>(&self, record: &'a ResourceRecord) -> Option<Cow<'a, Value>> {
        match self {
            Field::Id => Some(Cow::Owned(Value::String(record.id.clone()))),
            Field::Tombstoned => Some(Cow::Owned(Value::Bool(record.tombstoned))),
            Field::UpdatedAt => Some(Cow::Owned(Value::from(record.updated_at))),
            Field::Payload(path) => resolve_path(&record.payload, path).map(Cow::Borrowed),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Filter
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every record.
    All,
    Compare(Field, Comparison, Value),
    In(Field, Vec<Value>),
    Nin(Field, Vec<Value>),
    Exists(Field, bool),
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: Field, value: impl Into<Value>) -> Self {
        Filter::Compare(field, Comparison::Eq, value.into())
    }

    /// Records whose id is one of `ids`.
    pub fn id_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In(Field::Id, ids.into_iter().map(|id| Value::String(id.into())).collect())
    }

    /// Records that are not tombstoned.
    pub fn live() -> Self {
        Filter::eq(Field::Tombstoned, false)
    }

    /// Conjunction that flattens nested `And` and drops `All`.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) | (f, Filter::And(mut a)) => {
                a.push(f);
                Filter::And(a)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Parse an untrusted filter document.
    ///
    /// Top-level keys are field names (plain value = `$eq`, or an operator
    /// object) or `$and` / `$or` / `$nor`. Anything else is rejected.
    pub fn parse(document: &Value) -> Result<Self, FilterError> {
        parse_document(document, 0)
    }

    pub fn matches(&self, record: &ResourceRecord) -> bool {
        match self {
            Filter::All => true,
            Filter::Compare(field, op, expected) => {
                compare(field.value_of(record).as_deref(), *op, expected)
            }
            Filter::In(field, values) => {
                let actual = field.value_of(record);
                values.iter().any(|v| equals(actual.as_deref(), v))
            }
            Filter::Nin(field, values) => {
                let actual = field.value_of(record);
                !values.iter().any(|v| equals(actual.as_deref(), v))
            }
            Filter::Exists(field, wanted) => field.value_of(record).is_some() == *wanted,
            Filter::Not(inner) => !inner.matches(record),
            Filter::And(all) => all.iter().all(|f| f.matches(record)),
            Filter::Or(any) => any.iter().any(|f| f.matches(record)),
            Filter::Nor(none) => !none.iter().any(|f| f.matches(record)),
        }
    }
}

fn combine(mut clauses: Vec<Filter>) -> Filter {
    match clauses.len() {
        0 => Filter::All,
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    }
}

// ── Parsing ──

fn parse_document(document: &Value, depth: usize) -> Result<Filter, FilterError> {
    if depth > MAX_DEPTH {
        return Err(FilterError::TooDeep(MAX_DEPTH));
    }
    let map = document.as_object().ok_or(FilterError::NotAnObject)?;

    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "$and" => clauses.push(Filter::And(parse_list(key, value, depth)?)),
            "$or" => clauses.push(Filter::Or(parse_list(key, value, depth)?)),
            "$nor" => clauses.push(Filter::Nor(parse_list(key, value, depth)?)),
            op if op.starts_with('$') => return Err(FilterError::Operator(op.to_string())),
            name => {
                let field = Field::parse(name)?;
                clauses.push(parse_condition(field, value, depth + 1)?);
            }
        }
    }
    Ok(combine(clauses))
}

fn parse_list(operator: &str, value: &Value, depth: usize) -> Result<Vec<Filter>, FilterError> {
    let items = value.as_array().ok_or_else(|| FilterError::Operand {
        operator: operator.to_string(),
        reason: "expected an array of filter documents",
    })?;
    if items.is_empty() {
        return Err(FilterError::Operand {
            operator: operator.to_string(),
            reason: "expected a non-empty array",
        });
    }
    items.iter().map(|item| parse_document(item, depth + 1)).collect()
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    map.keys().any(|k| k.starts_with('$'))
}

fn parse_condition(field: Field, value: &Value, depth: usize) -> Result<Filter, FilterError> {
    if depth > MAX_DEPTH {
        return Err(FilterError::TooDeep(MAX_DEPTH));
    }
    match value {
        Value::Object(map) if is_operator_object(map) => {
            if let Some(plain) = map.keys().find(|k| !k.starts_with('$')) {
                return Err(FilterError::Field(plain.clone()));
            }
            let mut clauses = Vec::with_capacity(map.len());
            for (op, operand) in map {
                clauses.push(parse_operator(field.clone(), op, operand, depth)?);
            }
            Ok(combine(clauses))
        }
        literal => Ok(Filter::Compare(field, Comparison::Eq, literal.clone())),
    }
}

fn parse_operator(field: Field, op: &str, operand: &Value, depth: usize) -> Result<Filter, FilterError> {
    let comparison = match op {
        "$eq" => Some(Comparison::Eq),
        "$ne" => Some(Comparison::Ne),
        "$gt" => Some(Comparison::Gt),
        "$gte" => Some(Comparison::Gte),
        "$lt" => Some(Comparison::Lt),
        "$lte" => Some(Comparison::Lte),
        _ => None,
    };
    if let Some(comparison) = comparison {
        return Ok(Filter::Compare(field, comparison, operand.clone()));
    }

    match op {
        "$in" | "$nin" => {
            let values = operand.as_array().ok_or_else(|| FilterError::Operand {
                operator: op.to_string(),
                reason: "expected an array",
            })?;
            if op == "$in" {
                Ok(Filter::In(field, values.clone()))
            } else {
                Ok(Filter::Nin(field, values.clone()))
            }
        }
        "$exists" => {
            let wanted = operand.as_bool().ok_or_else(|| FilterError::Operand {
                operator: op.to_string(),
                reason: "expected a boolean",
            })?;
            Ok(Filter::Exists(field, wanted))
        }
        "$not" => match operand {
            Value::Object(map) if is_operator_object(map) => {
                Ok(Filter::Not(Box::new(parse_condition(field, operand, depth + 1)?)))
            }
            _ => Err(FilterError::Operand {
                operator: op.to_string(),
                reason: "expected an operator document",
            }),
        },
        other => Err(FilterError::Operator(other.to_string())),
    }
}

// ── Matching ──

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Missing fields equal `null`; arrays match when any element matches.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare(actual: Option<&Value>, op: Comparison, expected: &Value) -> bool {
    match op {
        Comparison::Eq => equals(actual, expected),
        Comparison::Ne => !equals(actual, expected),
        Comparison::Gt | Comparison::Gte | Comparison::Lt | Comparison::Lte => {
            let Some(ord) = actual.and_then(|a| ordering(a, expected)) else {
                return false;
            };
            match op {
                Comparison::Gt => ord == Ordering::Greater,
                Comparison::Gte => ord != Ordering::Less,
                Comparison::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            }
        }
    }
}
