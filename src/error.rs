//! Typed errors and HTTP mapping.

use crate::validation::ValidationIssue;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: model {model} property {property}")]
    InvalidPrimaryKey { model: String, property: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("duplicate route: {verb} {path}")]
    DuplicateRoute { verb: String, path: String },
    #[error("invalid hook event '{0}' (expected before:<identifier> or after:<identifier>)")]
    InvalidHookEvent(String),
    #[error("schema compile for {name}: {message}")]
    Schema { name: String, message: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Which database constraint a write violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{message}")]
    ParameterValidation {
        message: String,
        input: serde_json::Value,
        errors: Vec<ValidationIssue>,
    },
    #[error("result validation failed")]
    ResultValidation { errors: Vec<ValidationIssue> },
    #[error("not authorized")]
    Unauthorized,
    #[error("not authorized")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("constraint violation: {message}")]
    Constraint { kind: ConstraintKind, message: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error("{0}")]
    Wrapped(String),
}

impl AppError {
    pub fn parameters(input: serde_json::Value, errors: Vec<ValidationIssue>) -> Self {
        AppError::ParameterValidation {
            message: "the provided parameters are not valid".into(),
            input,
            errors,
        }
    }

    /// Wraps any foreign error so it leaves the lifecycle as a known kind.
    pub fn wrap<E: std::fmt::Display>(err: E) -> Self {
        AppError::Wrapped(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ParameterValidation { .. } => StatusCode::BAD_REQUEST,
            AppError::ResultValidation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Db(e) => db_status(e),
            AppError::Constraint { kind, .. } => constraint_status(*kind),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) | AppError::Wrapped(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::ParameterValidation { .. } => "parameter_validation",
            AppError::ResultValidation { .. } => "result_validation",
            AppError::Unauthorized | AppError::Forbidden => "authorization",
            AppError::NotFound(_) => "not_found",
            AppError::Db(sqlx::Error::RowNotFound) => "not_found",
            AppError::Db(_) | AppError::Constraint { .. } => "database_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) | AppError::Wrapped(_) => "internal_error",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::ParameterValidation { input, errors, .. } => Some(serde_json::json!({
                "input": input,
                "errors": errors,
            })),
            AppError::ResultValidation { errors } => Some(serde_json::json!({ "errors": errors })),
            AppError::Constraint { kind, .. } => Some(serde_json::json!({ "constraint": kind })),
            _ => None,
        }
    }
}

fn constraint_status(kind: ConstraintKind) -> StatusCode {
    match kind {
        ConstraintKind::Unique => StatusCode::CONFLICT,
        ConstraintKind::ForeignKey | ConstraintKind::NotNull | ConstraintKind::Check => StatusCode::BAD_REQUEST,
    }
}

fn db_status(e: &sqlx::Error) -> StatusCode {
    use sqlx::error::ErrorKind;
    match e {
        sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => constraint_status(ConstraintKind::Unique),
            ErrorKind::ForeignKeyViolation => constraint_status(ConstraintKind::ForeignKey),
            ErrorKind::NotNullViolation => constraint_status(ConstraintKind::NotNull),
            ErrorKind::CheckViolation => constraint_status(ConstraintKind::Check),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::wrap(e)
    }
}

impl From<chrono::ParseError> for AppError {
    fn from(e: chrono::ParseError) -> Self {
        AppError::wrap(e)
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_errors_do_not_leak_details() {
        assert_eq!(AppError::Forbidden.to_string(), "not authorized");
        assert!(AppError::Forbidden.details().is_none());
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn constraint_kinds_map_to_client_errors() {
        let unique = AppError::Constraint {
            kind: ConstraintKind::Unique,
            message: "duplicate id".into(),
        };
        assert_eq!(unique.status(), StatusCode::CONFLICT);
        let fk = AppError::Constraint {
            kind: ConstraintKind::ForeignKey,
            message: "missing parent".into(),
        };
        assert_eq!(fk.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Db(sqlx::Error::RowNotFound).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn result_validation_is_a_server_error() {
        let e = AppError::ResultValidation { errors: vec![] };
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code(), "result_validation");
    }
}
