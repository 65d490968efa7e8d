use hyper::{Body, Response, StatusCode};
use thiserror::Error;

use super::response::{json, ErrorResponse};
use crate::datastore::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request data: {0}")]
    InvalidBody(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no route for {0}")]
    RouteNotFound(String),
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("too many requests, please try again later")]
    RateLimited,
    #[error("request did not complete within {0:?}")]
    Timeout(std::time::Duration),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(err) => match err {
                StorageError::Validation(_) | StorageError::NoOpUpdate => StatusCode::BAD_REQUEST,
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::CapacityExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
                StorageError::Unhealthy(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn summary(&self) -> (&'static str, &'static str) {
        match self {
            ApiError::InvalidBody(_) => ("Invalid request data", "INVALID_BODY"),
            ApiError::BadRequest(_) => ("Invalid request parameters", "BAD_REQUEST"),
            ApiError::Storage(StorageError::Validation(_)) => {
                ("Validation failed", "VALIDATION_FAILED")
            }
            ApiError::Storage(StorageError::NoOpUpdate) => {
                ("No updates provided", "NO_UPDATES")
            }
            ApiError::Storage(StorageError::NotFound(_)) => ("Task not found", "NOT_FOUND"),
            ApiError::Storage(StorageError::CapacityExceeded(_)) => {
                ("Storage capacity exceeded", "CAPACITY_EXCEEDED")
            }
            ApiError::Storage(StorageError::Unhealthy(_)) => {
                ("Storage health check failed", "UNHEALTHY")
            }
            ApiError::RouteNotFound(_) => ("Route not found", "ROUTE_NOT_FOUND"),
            ApiError::MethodNotAllowed(_) => ("Method not allowed", "METHOD_NOT_ALLOWED"),
            ApiError::PayloadTooLarge(_) => ("Request body too large", "PAYLOAD_TOO_LARGE"),
            ApiError::RateLimited => ("Rate limit exceeded", "RATE_LIMIT_EXCEEDED"),
            ApiError::Timeout(_) => ("Request timed out", "TIMEOUT"),
        }
    }

    pub fn into_response(self) -> Response<Body> {
        let (message, code) = self.summary();
        json(
            self.status(),
            &ErrorResponse {
                success: false,
                message,
                error: Some(self.to_string()),
                code,
            },
        )
    }
}
