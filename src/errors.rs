//! # Error Handling
//!
//! Every failing CRUD operation returns an [`ApiError`]. Its `IntoResponse`
//! implementation is the single place where errors become HTTP responses:
//!
//! - the HTTP status equals the error `code`
//! - the body always has the shape `{"code": 404, "message": "...", "status": "Failed"}`
//! - database and internal errors are logged with `tracing` and, outside of
//!   [`Environment::Development`], masked behind a generic message
//!
//! ```rust,ignore
//! async fn handler(State(state): State<CrudState>) -> Result<Envelope<Row>, ApiError> {
//!     let row = repository.find_by_id(&id).await?   // DbErr converts automatically
//!         .ok_or_else(|| ApiError::not_found("User"))?;
//!     Ok(Envelope::new(row, "User fetched Successfully", "User fetched Successfully"))
//! }
//! ```
//!
//! Unique-constraint violations reported by the driver are turned into
//! [`ApiError::DuplicateField`] with a message naming the offending field.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use regex::Regex;
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use crate::config::{self, Environment};

const MASKED_MESSAGE: &str = "Something went wrong on server. Please try again.";

#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest { message: String },

    /// 401 Unauthorized
    Unauthorized { message: String },

    /// 403 Forbidden
    Forbidden { message: String },

    /// 404 Not Found
    NotFound { message: String },

    /// 409 Conflict
    Conflict { message: String },

    /// 422 Unprocessable Entity
    Unprocessable { message: String },

    /// 400 Bad Request raised by a unique-constraint violation
    DuplicateField {
        /// Column that violated the constraint
        field: String,
        /// Offending value, when the driver reports it
        value: Option<String>,
    },

    /// 500 Internal Server Error - database failure (details logged, masked in production)
    Database { internal: DbErr },

    /// 500 Internal Server Error
    Internal {
        message: String,
        /// Details logged server side, never sent in production
        internal: Option<String>,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// `"<resource> not found."`
    pub fn not_found(resource: impl fmt::Display) -> Self {
        Self::NotFound {
            message: format!("{resource} not found."),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable {
            message: message.into(),
        }
    }

    pub fn duplicate_field(field: impl Into<String>, value: Option<String>) -> Self {
        Self::DuplicateField {
            field: field.into(),
            value,
        }
    }

    /// Wrap a database error. Unique violations still become `DuplicateField`;
    /// use `From<DbErr>` when `RecordNotFound` should map to 404 as well.
    #[must_use]
    pub fn database(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            let (field, value) = parse_duplicate_key(&detail);
            return Self::DuplicateField { field, value };
        }
        Self::Database { internal: err }
    }

    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    /// HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } | Self::DuplicateField { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message for the current process environment
    #[must_use]
    pub fn user_message(&self) -> String {
        self.user_message_for(config::environment())
    }

    fn user_message_for(&self, environment: Environment) -> String {
        match self {
            Self::BadRequest { message }
            | Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Conflict { message }
            | Self::Unprocessable { message } => message.clone(),
            Self::DuplicateField { field, value } => {
                let field = title_case(field);
                match value {
                    Some(value) => format!("{field} of {value} already exists."),
                    None => format!("{field} already exists."),
                }
            }
            Self::Database { internal } => {
                if environment.is_development() {
                    format!("Query failed: {internal}")
                } else {
                    MASKED_MESSAGE.to_string()
                }
            }
            Self::Internal { message, internal } => match (environment, internal) {
                (Environment::Development, Some(details)) => format!("{message}: {details}"),
                (Environment::Development, None) => message.clone(),
                (Environment::Production, _) => MASKED_MESSAGE.to_string(),
            },
        }
    }

    fn log_internal(&self) {
        match self {
            Self::Database { internal } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Internal { message, internal } => {
                tracing::error!(
                    message = %message,
                    details = internal.as_deref().unwrap_or_default(),
                    "Internal error occurred"
                );
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

/// Uniform failure body
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub status: &'static str,
}

impl From<&ApiError> for ErrorBody {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.status_code().as_u16(),
            message: err.user_message(),
            status: "Failed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();
        (self.status_code(), Json(ErrorBody::from(&self))).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {}

/// - unique violation → `DuplicateField`
/// - `RecordNotFound` → 404
/// - anything else → 500 (logged, masked in production)
impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        match &err {
            DbErr::RecordNotFound(msg) => Self::NotFound {
                message: msg.clone(),
            },
            _ => Self::database(err),
        }
    }
}

/// Malformed JSON bodies are 400; well-formed bodies of the wrong shape are 422
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::UNPROCESSABLE_ENTITY => Self::unprocessable(rejection.body_text()),
            _ => Self::bad_request(rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

fn duplicate_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Postgres detail: Key (email)=(a@b.c) already exists.
            r"Key \((?P<field>[^)]+)\)=\((?P<value>[^)]*)\)",
            // MySQL: Duplicate entry 'a@b.c' for key 'users.email'
            r"Duplicate entry '(?P<value>[^']*)' for key '(?:[^'.]+\.)?(?P<field>[^']+)'",
            // SQLite: UNIQUE constraint failed: users.email
            r"UNIQUE constraint failed: (?:[^.,\s]+\.)?(?P<field>[^,\s]+)",
            // Postgres message: duplicate key value violates unique constraint "users_email_key"
            r#"unique constraint "(?P<field>[^"]+?)(?:_key)?""#,
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Extract the offending field (and value when present) from a driver message
fn parse_duplicate_key(detail: &str) -> (String, Option<String>) {
    for pattern in duplicate_patterns() {
        if let Some(captures) = pattern.captures(detail)
            && let Some(field) = captures.name("field")
        {
            let value = captures.name("value").map(|v| v.as_str().to_string());
            return (field.as_str().to_string(), value);
        }
    }
    ("field".to_string(), None)
}

/// `first_name` → `First name`
fn title_case(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
