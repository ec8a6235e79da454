// ABOUTME: Unified error handling for the Base Chat conversation engine
// ABOUTME: Defines ErrorCode, AppError, AppResult and the JSON error response envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Unified Error Handling
//!
//! Every fallible operation in the engine returns [`AppResult`]. Error codes
//! are a closed set so that HTTP status mapping and the JSON envelope stay
//! consistent across the web, widget and Slack surfaces.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Standard error codes used throughout the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Authentication & Authorization (1000-1999)
    /// Caller identity headers are missing or invalid
    #[serde(rename = "AUTH_INVALID")]
    AuthInvalid = 1001,
    /// Caller is not allowed to touch this resource
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied = 1004,

    // Validation (3000-3999)
    /// Request payload failed validation
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 3000,
    /// Requested model is not enabled for the tenant
    #[serde(rename = "MODEL_DISABLED")]
    ModelDisabled = 3004,

    // Resource Management (4000-4999)
    /// Resource does not exist in the caller's tenant
    #[serde(rename = "RESOURCE_NOT_FOUND")]
    ResourceNotFound = 4000,
    /// Write conflicted with the current resource state
    #[serde(rename = "RESOURCE_CONFLICT")]
    ResourceConflict = 4001,
    /// External team or chatbot id does not map to a tenant
    #[serde(rename = "UNKNOWN_TENANT")]
    UnknownTenant = 4004,

    // External Services (5000-5999)
    /// Upstream service returned an error
    #[serde(rename = "EXTERNAL_SERVICE_ERROR")]
    ExternalServiceError = 5000,
    /// Upstream service could not be reached
    #[serde(rename = "EXTERNAL_SERVICE_UNAVAILABLE")]
    ExternalServiceUnavailable = 5001,
    /// Upstream rejected our credentials
    #[serde(rename = "EXTERNAL_AUTH_FAILED")]
    ExternalAuthFailed = 5002,
    /// Upstream rate limit hit
    #[serde(rename = "EXTERNAL_RATE_LIMITED")]
    ExternalRateLimited = 5003,
    /// Retrieval backend failed; the turn is aborted
    #[serde(rename = "RETRIEVAL_UNAVAILABLE")]
    RetrievalUnavailable = 5100,

    // Request lifecycle (7000-7999)
    /// Caller went away before the operation finished
    #[serde(rename = "REQUEST_CANCELLED")]
    RequestCancelled = 7000,
    /// Operation exceeded its time budget
    #[serde(rename = "REQUEST_TIMEOUT")]
    RequestTimeout = 7001,

    // Configuration (6000-6999)
    /// Configuration could not be loaded
    #[serde(rename = "CONFIG_ERROR")]
    ConfigError = 6000,

    // Internal Errors (9000-9999)
    /// Unexpected internal failure
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9000,
    /// Database operation failed
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9001,
    /// Data could not be (de)serialized
    #[serde(rename = "SERIALIZATION_ERROR")]
    SerializationError = 9003,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::ModelDisabled => 400,
            Self::AuthInvalid => 401,
            Self::PermissionDenied => 403,
            Self::ResourceNotFound | Self::UnknownTenant => 404,
            Self::ResourceConflict => 409,
            Self::RequestTimeout => 408,
            Self::RequestCancelled => 499,
            Self::ExternalServiceError | Self::ExternalServiceUnavailable => 502,
            Self::RetrievalUnavailable | Self::ExternalAuthFailed | Self::ExternalRateLimited => {
                503
            }
            Self::InternalError
            | Self::DatabaseError
            | Self::SerializationError
            | Self::ConfigError => 500,
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AuthInvalid => "The caller identity is missing or invalid",
            Self::PermissionDenied => "You do not have permission to perform this action",
            Self::InvalidInput => "The provided input is invalid",
            Self::ModelDisabled => "The requested model is not enabled for this organization",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::ResourceConflict => "The resource was modified concurrently",
            Self::UnknownTenant => "No organization is linked to this identifier",
            Self::ExternalServiceError => "An external service encountered an error",
            Self::ExternalServiceUnavailable => "An external service is currently unavailable",
            Self::ExternalAuthFailed => "Authentication with external service failed",
            Self::ExternalRateLimited => "External service rate limit exceeded",
            Self::RetrievalUnavailable => "Search is temporarily unavailable",
            Self::RequestCancelled => "The request was cancelled",
            Self::RequestTimeout => "The operation timed out",
            Self::ConfigError => "Configuration error encountered",
            Self::InternalError => "An internal server error occurred",
            Self::DatabaseError => "Database operation failed",
            Self::SerializationError => "Data serialization/deserialization failed",
        }
    }
}

/// Additional context that can be attached to errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Request ID for tracing
    pub request_id: Option<String>,
    /// Resource ID if applicable
    pub resource_id: Option<String>,
    /// Additional key-value context
    pub details: Value,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            request_id: None,
            resource_id: None,
            details: Value::Object(Map::new()),
        }
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Additional context
    pub context: ErrorContext,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add a request ID to the error context
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.context.request_id = Some(request_id.into());
        self
    }

    /// Add a resource ID to the error context
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.context.resource_id = Some(resource_id.into());
        self
    }

    /// Add details to the error context
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.context.details = details;
        self
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Whether this error means the caller went away
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::RequestCancelled
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error payload
    pub error: ErrorResponseDetails,
}

/// Body of an [`ErrorResponse`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponseDetails {
    /// Machine readable code
    pub code: ErrorCode,
    /// Human readable message
    pub message: String,
    /// Correlation id, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Extra structured details
    #[serde(default, skip_serializing_if = "is_empty_details")]
    pub details: Value,
}

fn is_empty_details(details: &Value) -> bool {
    match details {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        Self {
            error: ErrorResponseDetails {
                code: error.code,
                message: error.message,
                request_id: error.context.request_id,
                details: error.context.details,
            },
        }
    }
}

/// Convenience functions for creating common errors
impl AppError {
    /// Invalid caller identity
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Caller lacks permission
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// Resource not found
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Write conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceConflict, message)
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// External service error
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExternalServiceError,
            format!("{}: {}", service.into(), message.into()),
        )
    }

    /// External service unreachable
    pub fn external_unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExternalServiceUnavailable,
            format!("{}: {}", service.into(), message.into()),
        )
    }

    /// Retrieval backend failure
    pub fn retrieval_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RetrievalUnavailable, message)
    }

    /// Model not enabled for tenant
    pub fn model_disabled(model: &str) -> Self {
        Self::new(
            ErrorCode::ModelDisabled,
            format!("Model '{model}' is not enabled"),
        )
        .with_details(json!({ "model": model }))
    }

    /// External team or chatbot id with no tenant behind it
    pub fn unknown_tenant(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self::new(
            ErrorCode::UnknownTenant,
            format!("No tenant linked to '{identifier}'"),
        )
        .with_resource_id(identifier)
    }

    /// Caller cancelled the request
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestCancelled, message)
    }

    /// Time budget exceeded
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::RequestTimeout,
            format!("{} timed out", operation.into()),
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

#[cfg(feature = "database-errors")]
impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::database(error.to_string())
    }
}

#[cfg(feature = "http-response")]
mod http_response {
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use http::StatusCode;
    use tracing::{error, warn};

    use super::{AppError, ErrorResponse};

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(self.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                error!(code = ?self.code, message = %self.message, "Request failed");
            } else {
                warn!(code = ?self.code, message = %self.message, "Request rejected");
            }
            (status, Json(ErrorResponse::from(self))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::AuthInvalid.http_status(), 401);
        assert_eq!(ErrorCode::ResourceNotFound.http_status(), 404);
        assert_eq!(ErrorCode::RetrievalUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::ModelDisabled.http_status(), 400);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn test_app_error_creation() {
        let error = AppError::not_found("Conversation")
            .with_request_id("req-123")
            .with_resource_id("abc");

        assert_eq!(error.code, ErrorCode::ResourceNotFound);
        assert_eq!(error.message, "Conversation not found");
        assert_eq!(error.context.request_id.as_deref(), Some("req-123"));
        assert_eq!(error.context.resource_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::from(AppError::model_disabled("gpt-4o"));

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("MODEL_DISABLED"));
        assert!(json.contains("gpt-4o"));
    }

    #[test]
    fn test_empty_details_are_omitted() {
        let response = ErrorResponse::from(AppError::internal("boom"));
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["error"].get("details").is_none());
        assert!(json["error"].get("request_id").is_none());
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(AppError::cancelled("client went away").is_cancelled());
        assert!(!AppError::internal("x").is_cancelled());
    }
}
