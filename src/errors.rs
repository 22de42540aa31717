use crate::validation::ValidationIssue;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Submission rejected by the validation layer, one entry per offending field.
    Validation(Vec<ValidationIssue>),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Request conflicts with the current state of the resource.
    Conflict(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// A table or column the request needs is missing from the database.
    ModelNotReady(String),
    /// Internal server error.
    InternalError(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
    /// Same response as the wrapped error, plus a `details` field with its full text.
    Verbose(Box<AppError>),
}

/// What kind of storage failure a `sqlx::Error` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailure {
    Unreachable,
    InvalidConnectionString,
    ModelNotReady,
    Other,
}

impl StorageFailure {
    /// Classifies by error variant first, then by Postgres SQLSTATE.
    pub fn classify(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(_) => StorageFailure::InvalidConnectionString,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageFailure::Unreachable,
            sqlx::Error::ColumnNotFound(_) => StorageFailure::ModelNotReady,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // undefined_table, undefined_column
                Some("42P01") | Some("42703") => StorageFailure::ModelNotReady,
                // invalid_password, invalid_authorization_specification, invalid_catalog_name
                Some("28P01") | Some("28000") | Some("3D000") => {
                    StorageFailure::InvalidConnectionString
                }
                Some(code) if code.starts_with("08") => StorageFailure::Unreachable,
                _ => StorageFailure::Other,
            },
            _ => StorageFailure::Other,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            StorageFailure::Unreachable => "DATABASE_UNREACHABLE",
            StorageFailure::InvalidConnectionString => "INVALID_CONNECTION_STRING",
            StorageFailure::ModelNotReady => "MODEL_NOT_READY",
            StorageFailure::Other => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::Validation(issues) => {
                write!(f, "Validation failed: {} issue(s)", issues.len())
            }
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::ModelNotReady(msg) => write!(f, "Server model not ready: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
            AppError::Verbose(source) => write!(f, "{}", source),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::DatabaseError(e) => Some(e),
            AppError::WithContext { source, .. } | AppError::Verbose(source) => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

impl AppError {
    /// Wraps the error so its response carries diagnostics when `enabled` is set.
    pub fn verbose(self, enabled: bool) -> Self {
        if enabled {
            AppError::Verbose(Box::new(self))
        } else {
            self
        }
    }

    fn status_and_body(&self) -> (StatusCode, Value) {
        match self {
            AppError::DatabaseError(e) => {
                let failure = StorageFailure::classify(e);
                tracing::error!(kind = ?failure, "Database error: {:?}", e);
                let (status, message) = match failure {
                    StorageFailure::Unreachable => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Database unreachable, please try again later",
                    ),
                    StorageFailure::InvalidConnectionString => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Database connection is misconfigured, please try again later",
                    ),
                    StorageFailure::ModelNotReady => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Server model not ready, please try again later",
                    ),
                    StorageFailure::Other => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Something went wrong, please try again",
                    ),
                };
                (status, json!({ "error": message, "code": failure.code() }))
            }
            AppError::Validation(issues) => {
                tracing::warn!("Validation failed with {} issue(s)", issues.len());
                (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "Validation failed", "issues": issues }),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "External service error" }),
                )
            }
            AppError::ModelNotReady(msg) => {
                tracing::error!("Server model not ready: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error": "Server model not ready, please try again later",
                        "code": StorageFailure::ModelNotReady.code(),
                    }),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" }))
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                source.status_and_body()
            }
            AppError::Verbose(source) => {
                let (status, mut body) = source.status_and_body();
                body["details"] = json!(source.to_string());
                (status, body)
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn classifies_connection_failures() {
        let refused = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(StorageFailure::classify(&refused), StorageFailure::Unreachable);
        assert_eq!(
            StorageFailure::classify(&sqlx::Error::PoolTimedOut),
            StorageFailure::Unreachable
        );
        assert_eq!(
            StorageFailure::classify(&sqlx::Error::Configuration("bad url".into())),
            StorageFailure::InvalidConnectionString
        );
        assert_eq!(
            StorageFailure::classify(&sqlx::Error::ColumnNotFound("vehicle_hint".into())),
            StorageFailure::ModelNotReady
        );
        assert_eq!(
            StorageFailure::classify(&sqlx::Error::RowNotFound),
            StorageFailure::Other
        );
    }

    #[tokio::test]
    async fn unreachable_database_is_500_with_code() {
        let (status, body) = body_json(AppError::DatabaseError(sqlx::Error::PoolTimedOut)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "DATABASE_UNREACHABLE");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn missing_column_is_503() {
        let err = AppError::DatabaseError(sqlx::Error::ColumnNotFound("agree_terms".into()));
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "MODEL_NOT_READY");
    }

    #[tokio::test]
    async fn validation_body_lists_issues() {
        let err = AppError::Validation(vec![ValidationIssue::new("agreeTerms", "must be true")]);
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["issues"][0]["path"], "agreeTerms");
    }

    #[tokio::test]
    async fn context_delegates_to_source_response() {
        let err: Result<(), AppError> =
            Err(AppError::NotFound("Financing application 7 not found".into()));
        let (status, _) = body_json(err.context("loading application").unwrap_err()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sqlx_context_keeps_storage_classification() {
        let err: Result<(), sqlx::Error> =
            Err(sqlx::Error::ColumnNotFound("vehicle_hint".into()));
        let wrapped = err.context("inserting financing detail").unwrap_err();
        assert!(wrapped.to_string().starts_with("inserting financing detail"));
        let (status, body) = body_json(wrapped).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "MODEL_NOT_READY");
    }

    #[tokio::test]
    async fn verbose_adds_details_only_when_enabled() {
        let quiet = AppError::DatabaseError(sqlx::Error::PoolClosed).verbose(false);
        let (_, body) = body_json(quiet).await;
        assert!(body.get("details").is_none());

        let loud = AppError::DatabaseError(sqlx::Error::PoolClosed).verbose(true);
        let (status, body) = body_json(loud).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["details"].as_str().unwrap().starts_with("Database error"));
    }
}
