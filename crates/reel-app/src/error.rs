use std::collections::BTreeMap;

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use reel_dal::ValidationErrors;
use serde_json::json;
use tracing::{debug, error};

pub type ApiResult<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("the requested resource could not be found")]
    ResourceNotFound(String),

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("invalid data: {0}")]
    Validation(ValidationErrors),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("you must be authenticated to access this resource")]
    Unauthorized,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    Forbidden,

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("storage error: {0}")]
    DatabaseError(#[source] reel_dal::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::EditConflict => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidQuery(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::InternalError(_) | ApiError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Field to message map, first message per field wins.
fn validation_body(errors: &ValidationErrors) -> BTreeMap<&str, &str> {
    let mut body = BTreeMap::new();
    for (field, message) in errors.iter() {
        body.entry(field).or_insert(message);
    }
    body
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(errors) => json!({ "error": validation_body(errors) }),
            ApiError::InternalError(cause) => {
                error!("Internal error: {cause}");
                json!({ "error": "the server encountered a problem and could not process your request" })
            }
            ApiError::DatabaseError(cause) => {
                error!("Storage error: {cause}");
                json!({ "error": "the server encountered a problem and could not process your request" })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<reel_dal::Error> for ApiError {
    fn from(value: reel_dal::Error) -> Self {
        match value {
            reel_dal::Error::RecordNotFound(what) => {
                debug!("Record not found: {what}");
                ApiError::ResourceNotFound(what)
            }
            reel_dal::Error::EditConflict { .. } => ApiError::EditConflict,
            reel_dal::Error::Validation(errors) => ApiError::Validation(errors),
            other => ApiError::DatabaseError(other),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(value: ValidationErrors) -> Self {
        ApiError::Validation(value)
    }
}

impl From<garde::Report> for ApiError {
    fn from(value: garde::Report) -> Self {
        ApiError::Validation(value.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        ApiError::InvalidRequest(value.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        ApiError::InvalidQuery(value.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        debug!("Invalid path: {}", value.body_text());
        ApiError::ResourceNotFound("path".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            StatusCode::NOT_FOUND,
            ApiError::from(reel_dal::Error::RecordNotFound("Movie".into())).status()
        );
        assert_eq!(
            StatusCode::CONFLICT,
            ApiError::from(reel_dal::Error::EditConflict { id: 1, version: 2 }).status()
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::from(reel_dal::Error::Timeout(reel_dal::QUERY_TIMEOUT)).status()
        );
        let mut errors = ValidationErrors::new();
        errors.add("title", "must be provided");
        assert_eq!(
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::from(reel_dal::Error::Validation(errors)).status()
        );
    }

    #[test]
    fn test_validation_body_keeps_first_message() {
        let mut errors = ValidationErrors::new();
        errors.add("year", "must be provided");
        errors.add("year", "must not be in the future");
        errors.add("title", "must be provided");
        let body = validation_body(&errors);
        assert_eq!(2, body.len());
        assert_eq!(Some(&"must be provided"), body.get("year"));
    }
}
