// ABOUTME: HTTP middleware for request tracing and cross-origin access
// ABOUTME: Provides request id generation, per-request spans and CORS configuration

/// Cross-origin configuration
pub mod cors;
/// Request ids and spans
pub mod tracing;

pub use cors::setup_cors;
pub use tracing::{create_request_span, MakeRequestIdWithPrefix};

/// Header carrying the request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";
