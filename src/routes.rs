use crate::crud::{CrudOptions, CrudState};
use crate::errors::ApiError;
use crate::filter::{Filter, parse_scalar};
use crate::models::{Envelope, FilterOptions, PeekResult, Row};
use crate::registry::CrudEntity;
use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, State},
};
use serde_json::Value as JsonValue;

/// `axum::Json` whose rejections answer with the uniform error body
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// `axum::extract::Query` whose rejections answer with the uniform error body
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Query<T>(pub T);

/// `axum::extract::Path` whose rejections answer with the uniform error body
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct Path<T>(pub T);

fn id_criteria<T: CrudEntity>(id: &str) -> Filter {
    let mut criteria = Filter::new();
    criteria.insert(T::ID_COLUMN.to_string(), parse_scalar(id));
    criteria
}

// Find resources with a flat filter, e.g. `?filter={"category":3}&relations=category`.
pub async fn find_handler<T>(
    State(state): State<CrudState>,
    Query(params): Query<FilterOptions>,
) -> Result<Envelope<Vec<Row>>, ApiError>
where
    T: CrudEntity,
{
    let relations = params.parse_relations();
    let relations: Vec<&str> = relations.iter().map(String::as_str).collect();
    state
        .crud::<T>()
        .find(params.to_query()?, &relations, CrudOptions::default())
        .await
}

// List resources. An empty page is not an error.
pub async fn get_all_handler<T>(
    State(state): State<CrudState>,
    Query(params): Query<FilterOptions>,
) -> Result<Envelope<Vec<Row>>, ApiError>
where
    T: CrudEntity,
{
    let relations = params.parse_relations();
    let relations: Vec<&str> = relations.iter().map(String::as_str).collect();
    state
        .crud::<T>()
        .get_all(params.to_query()?, &relations, CrudOptions::default())
        .await
}

pub async fn create_handler<T>(
    State(state): State<CrudState>,
    JsonBody(payload): JsonBody<JsonValue>,
) -> Result<Envelope<Row>, ApiError>
where
    T: CrudEntity,
{
    state
        .crud::<T>()
        .create(payload, CrudOptions::default())
        .await
}

pub async fn update_handler<T>(
    State(state): State<CrudState>,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<JsonValue>,
) -> Result<Envelope<Row>, ApiError>
where
    T: CrudEntity,
{
    state
        .crud::<T>()
        .update(id_criteria::<T>(&id), payload, CrudOptions::default())
        .await
}

pub async fn delete_handler<T>(
    State(state): State<CrudState>,
    Path(id): Path<String>,
) -> Result<Envelope<Row>, ApiError>
where
    T: CrudEntity,
{
    state
        .crud::<T>()
        .delete(id_criteria::<T>(&id), CrudOptions::default())
        .await
}

// Delete every resource matching `?filter=...`. Page parameters are ignored.
// A missing or empty filter is rejected rather than clearing the table.
pub async fn delete_all_handler<T>(
    State(state): State<CrudState>,
    Query(params): Query<FilterOptions>,
) -> Result<Envelope<Vec<Row>>, ApiError>
where
    T: CrudEntity,
{
    let filter = params.parse_filter()?;
    if filter.is_empty() {
        return Err(ApiError::bad_request(format!(
            "Deleting all {}s requires a filter",
            T::NAME
        )));
    }
    state
        .crud::<T>()
        .delete_all(filter, CrudOptions::default())
        .await
}

// Resolve referenced rows, e.g. `?filter={"category":{"id":[1,2]}}`.
pub async fn peek_handler<T>(
    State(state): State<CrudState>,
    Query(params): Query<FilterOptions>,
) -> Result<Json<PeekResult>, ApiError>
where
    T: CrudEntity,
{
    state
        .crud::<T>()
        .peek(params.parse_filter()?, CrudOptions::default())
        .await
        .map(Json)
}
