//! # Filters
//!
//! API consumers write flat filters such as `{"category": 3, "title": "Mug"}`.
//! Relation equality needs the nested shape `{"category": {"id": 3}}`, which
//! [`purify_where`] produces. [`relations_for_where`] reports which relations
//! such a filter touches so they can be loaded alongside the rows, and
//! [`build_condition`] turns the normalized filter into a sea-orm `Condition`.
//!
//! ## Value shapes
//!
//! ```rust,ignore
//! {"title": "Mug"}                      // title = 'Mug'
//! {"id": [1, 2, 3]}                     // id IN (1, 2, 3)
//! {"deleted_at": null}                  // deleted_at IS NULL
//! {"price": {"gte": 5, "lt": 20}}       // price >= 5 AND price < 20
//! {"title": {"like": "mug"}}            // UPPER(title) LIKE '%MUG%'
//! {"category": {"id": 3}}               // category_id = 3
//! {"category": {"name": "Kitchen"}}     // category_id IN (SELECT id FROM categories WHERE name = 'Kitchen')
//! ```

use sea_orm::{
    Condition, DbBackend, Value,
    sea_query::{Alias, Expr, Func, Query, SimpleExpr},
};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::registry::EntityDescriptor;

/// Filter object as received from API consumers
pub type Filter = Map<String, JsonValue>;

/// Nested relation filters deeper than this are rejected
const MAX_RELATION_DEPTH: usize = 4;

/// Comparison operators accepted inside operator objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive substring match
    Like,
    In,
    NotIn,
    /// `{"is_null": true}` or `{"is_null": false}`
    IsNull,
}

impl FilterOperator {
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "like" => Some(Self::Like),
            "in" => Some(Self::In),
            "not_in" => Some(Self::NotIn),
            "is_null" => Some(Self::IsNull),
            _ => None,
        }
    }
}

/// Rewrite flat relation values into the nested `{id: value}` shape.
///
/// Only keys listed in `relation_properties` are touched. Scalars and arrays
/// are wrapped; objects (already nested, or operator expressions) and `null`
/// pass through unchanged. Applying it twice gives the same result as once.
#[must_use]
pub fn purify_where(filter: &Filter, relation_properties: &[&str]) -> Filter {
    let mut rewritten = Filter::new();
    for (key, value) in filter {
        if !relation_properties.contains(&key.as_str()) {
            continue;
        }
        if matches!(value, JsonValue::Object(_) | JsonValue::Null) {
            continue;
        }
        let mut nested = Filter::new();
        nested.insert("id".to_string(), value.clone());
        rewritten.insert(key.clone(), JsonValue::Object(nested));
    }

    let mut purified = filter.clone();
    purified.extend(rewritten);
    purified
}

/// Relation properties referenced by `filter`
#[must_use]
pub fn relations_for_where(filter: &Filter, relation_properties: &[&str]) -> BTreeSet<String> {
    filter
        .keys()
        .filter(|key| relation_properties.contains(&key.as_str()))
        .cloned()
        .collect()
}

/// Build a sea-orm condition for a normalized filter on `entity`.
///
/// # Errors
///
/// Returns `ApiError::BadRequest` for keys that are neither columns nor
/// relation properties, for unknown operators, and for malformed operator
/// values.
pub fn build_condition(
    filter: &Filter,
    entity: &EntityDescriptor,
    backend: DbBackend,
) -> Result<Condition, ApiError> {
    build_condition_at_depth(filter, entity, backend, 0)
}

fn build_condition_at_depth(
    filter: &Filter,
    entity: &EntityDescriptor,
    backend: DbBackend,
    depth: usize,
) -> Result<Condition, ApiError> {
    if depth > MAX_RELATION_DEPTH {
        return Err(ApiError::bad_request("Relation filter is nested too deeply"));
    }

    let mut condition = Condition::all();
    for (key, value) in filter {
        if !is_valid_field_name(key) {
            return Err(ApiError::bad_request(format!("Invalid filter field '{key}'")));
        }

        if let Some(relation) = entity.relation(key) {
            condition = condition.add(relation_condition(
                relation.column,
                &relation.target(),
                value,
                backend,
                depth,
            )?);
        } else if key == entity.id_column {
            condition = condition.add(column_condition(key, &coerce_key_value(value), backend)?);
        } else if entity.has_column(key) {
            condition = condition.add(column_condition(key, value, backend)?);
        } else {
            return Err(ApiError::bad_request(format!(
                "Unknown filter field '{key}' for {}",
                entity.name
            )));
        }
    }
    Ok(condition)
}

fn relation_condition(
    column: &str,
    target: &EntityDescriptor,
    value: &JsonValue,
    backend: DbBackend,
    depth: usize,
) -> Result<Condition, ApiError> {
    let JsonValue::Object(nested) = value else {
        return column_condition(column, &coerce_key_value(value), backend);
    };

    // {category: {id: ...}} compares the foreign key directly
    if nested.len() == 1
        && let Some(id_value) = nested.get("id").or_else(|| nested.get(target.id_column))
    {
        return column_condition(column, &coerce_key_value(id_value), backend);
    }

    // {category: {gte: 3}} is an operator object on the foreign key
    if !nested.is_empty() && nested.keys().all(|k| FilterOperator::from_key(k).is_some()) {
        return column_condition(column, &coerce_key_value(value), backend);
    }

    let inner = build_condition_at_depth(nested, target, backend, depth + 1)?;
    let mut subquery = Query::select();
    subquery
        .column(Alias::new(target.id_column))
        .from(Alias::new(target.table))
        .cond_where(inner);

    Ok(Condition::all().add(Expr::col(Alias::new(column)).in_subquery(subquery)))
}

fn column_condition(
    column: &str,
    value: &JsonValue,
    backend: DbBackend,
) -> Result<Condition, ApiError> {
    let condition = Condition::all();
    match value {
        JsonValue::Null => Ok(condition.add(Expr::col(Alias::new(column)).is_null())),
        JsonValue::Array(items) => Ok(condition.add(
            Expr::col(Alias::new(column)).is_in(items.iter().map(|v| to_db_value(v, backend))),
        )),
        JsonValue::Object(operators) => {
            if operators.is_empty() {
                return Err(ApiError::bad_request(format!(
                    "Empty operator object for '{column}'"
                )));
            }
            operators
                .iter()
                .try_fold(condition, |condition, (key, operand)| {
                    let operator = FilterOperator::from_key(key).ok_or_else(|| {
                        ApiError::bad_request(format!("Unknown operator '{key}' for '{column}'"))
                    })?;
                    Ok(condition.add(operator_expr(column, operator, operand, backend)?))
                })
        }
        scalar => Ok(condition.add(Expr::col(Alias::new(column)).eq(to_db_value(scalar, backend)))),
    }
}

fn operator_expr(
    column: &str,
    operator: FilterOperator,
    operand: &JsonValue,
    backend: DbBackend,
) -> Result<SimpleExpr, ApiError> {
    let col = Expr::col(Alias::new(column));
    let expr = match operator {
        FilterOperator::Eq if operand.is_null() => col.is_null(),
        FilterOperator::Neq if operand.is_null() => col.is_not_null(),
        FilterOperator::Eq => col.eq(to_db_value(operand, backend)),
        FilterOperator::Neq => col.ne(to_db_value(operand, backend)),
        FilterOperator::Gt => col.gt(to_db_value(operand, backend)),
        FilterOperator::Gte => col.gte(to_db_value(operand, backend)),
        FilterOperator::Lt => col.lt(to_db_value(operand, backend)),
        FilterOperator::Lte => col.lte(to_db_value(operand, backend)),
        FilterOperator::Like => {
            let pattern = operand.as_str().ok_or_else(|| {
                ApiError::bad_request(format!("'like' on '{column}' expects a string"))
            })?;
            SimpleExpr::FunctionCall(Func::upper(Expr::col(Alias::new(column))))
                .like(format!("%{}%", pattern.to_uppercase()))
        }
        FilterOperator::In | FilterOperator::NotIn => {
            let items = operand.as_array().ok_or_else(|| {
                ApiError::bad_request(format!("'in' on '{column}' expects an array"))
            })?;
            let values = items.iter().map(|v| to_db_value(v, backend));
            if operator == FilterOperator::In {
                col.is_in(values)
            } else {
                col.is_not_in(values)
            }
        }
        FilterOperator::IsNull => match operand.as_bool() {
            Some(true) => col.is_null(),
            Some(false) => col.is_not_null(),
            None => {
                return Err(ApiError::bad_request(format!(
                    "'is_null' on '{column}' expects a boolean"
                )));
            }
        },
    };
    Ok(expr)
}

/// Convert a JSON value into a bindable database value.
///
/// UUID-looking strings bind as native UUIDs on Postgres only; the other
/// backends store them as text.
#[must_use]
pub fn to_db_value(value: &JsonValue, backend: DbBackend) -> Value {
    match value {
        JsonValue::Null => Option::<String>::None.into(),
        JsonValue::Bool(b) => (*b).into(),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if let Some(u) = n.as_u64() {
                u.into()
            } else {
                n.as_f64().unwrap_or_default().into()
            }
        }
        JsonValue::String(s) => {
            if backend == DbBackend::Postgres
                && let Ok(uuid) = Uuid::parse_str(s)
            {
                uuid.into()
            } else {
                s.clone().into()
            }
        }
        other => other.to_string().into(),
    }
}

/// Turn integer-looking strings into numbers for id and foreign-key comparisons.
///
/// Arrays and operator objects are coerced element-wise. Other strings, such
/// as UUIDs, are left alone.
#[must_use]
pub fn coerce_key_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_or_else(|_| value.clone(), JsonValue::from),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(coerce_key_value).collect()),
        JsonValue::Object(operators) => JsonValue::Object(
            operators
                .iter()
                .map(|(key, operand)| (key.clone(), coerce_key_value(operand)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Parse a path or query string into the JSON value it most likely denotes
#[must_use]
pub fn parse_scalar(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return JsonValue::from(i);
    }
    match trimmed {
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        "null" => JsonValue::Null,
        _ => JsonValue::String(trimmed.to_string()),
    }
}

/// Basic field name validation
fn is_valid_field_name(field_name: &str) -> bool {
    !field_name.is_empty()
        && field_name.len() <= 100
        && field_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
