use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use utoipa::{IntoParams, ToSchema};

use crate::errors::ApiError;
use crate::filter::Filter;
use crate::pagination::PaginationMeta;

/// A database row as a JSON object
pub type Row = JsonValue;

/// Query parameters for filtering, pagination and relation loading.
///
/// # Filtering
/// The `filter` parameter accepts a JSON-encoded object:
/// - **Flat relation filter:** `{"category": 3}` matches rows whose category has id 3
/// - **Nested relation filter:** `{"category": {"id": [3, 4]}}`
/// - **Column filter:** `{"title": "Mug"}`
/// - **Operators:** `{"price": {"gte": 5}}`
///
/// # Pagination
/// `page` (1-based) and `take` (page size). Missing or zero values use the defaults.
///
/// # Relations
/// `relations` is a comma separated list of relation properties to load, for example `category,brand`.
#[derive(Debug, Deserialize, IntoParams, ToSchema, Default)]
#[into_params(parameter_in = Query)]
pub struct FilterOptions {
    /// JSON-encoded filter object.
    #[param(example = json!({"category": 3, "title": "Mug"}))]
    pub filter: Option<String>,
    /// Page number (1-based).
    #[param(example = 1)]
    pub page: Option<u64>,
    /// Number of items per page.
    #[param(example = 10)]
    pub take: Option<u64>,
    /// Comma separated relation properties to load.
    #[param(example = "category")]
    pub relations: Option<String>,
}

impl FilterOptions {
    /// Parse the `filter` parameter.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BadRequest` when the filter is not a JSON object.
    pub fn parse_filter(&self) -> Result<Filter, ApiError> {
        let Some(raw) = self.filter.as_deref().filter(|raw| !raw.trim().is_empty()) else {
            return Ok(Filter::new());
        };
        match serde_json::from_str::<JsonValue>(raw) {
            Ok(JsonValue::Object(map)) => Ok(map),
            Ok(_) => Err(ApiError::bad_request("Filter must be a JSON object")),
            Err(e) => Err(ApiError::bad_request(format!("Invalid JSON in filter: {e}"))),
        }
    }

    #[must_use]
    pub fn parse_relations(&self) -> Vec<String> {
        self.relations
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Filter plus paging, ready for `Crud::find` or `Crud::get_all`
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BadRequest` when the filter does not parse.
    pub fn to_query(&self) -> Result<FindQuery, ApiError> {
        Ok(FindQuery {
            filter: self.parse_filter()?,
            page: self.page,
            take: self.take,
        })
    }
}

/// Filter and page request for list operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub page: Option<u64>,
    pub take: Option<u64>,
}

impl FindQuery {
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            page: None,
            take: None,
        }
    }

    #[must_use]
    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }
}

/// Overrides merged into a success envelope
#[derive(Debug, Clone, Default)]
pub struct ResponseOverride {
    pub status: Option<StatusCode>,
    pub description: Option<String>,
    pub toast: Option<String>,
}

/// Uniform success body
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub description: String,
    pub results: T,
    pub meta: Option<PaginationMeta>,
    pub toast: String,
    pub cookie: bool,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl<T> Envelope<T> {
    pub fn new(results: T, description: impl Into<String>, toast: impl Into<String>) -> Self {
        Self {
            status: "success",
            description: description.into(),
            results,
            meta: None,
            toast: toast.into(),
            cookie: false,
            status_code: StatusCode::OK,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: PaginationMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status_code: StatusCode) -> Self {
        self.status_code = status_code;
        self
    }

    #[must_use]
    pub fn apply(mut self, overrides: ResponseOverride) -> Self {
        if let Some(status) = overrides.status {
            self.status_code = status;
        }
        if let Some(description) = overrides.description {
            self.description = description;
        }
        if let Some(toast) = overrides.toast {
            self.toast = toast;
        }
        self
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

/// Outcome of `Crud::peek`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeekResult {
    /// `true` when at least one referenced row exists
    pub is_peek_success: bool,
    /// Every resolved row, flattened across properties
    pub data: Vec<Row>,
    /// Resolved rows per filter property
    pub object_data: Map<String, JsonValue>,
}

/// Outcome of `Crud::is_exists`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Existence {
    pub is_exists: bool,
    pub data: Option<Row>,
}
