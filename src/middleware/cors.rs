// ABOUTME: CORS middleware configuration for the chat HTTP API
// ABOUTME: Allows the web client's identity headers and exposes the reply correlation headers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use http::{header::HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::ServerConfig;
use crate::routes::chat::{PROFILE_HEADER, TENANT_HEADER};
use crate::routes::{CONVERSATION_ID_HEADER, MESSAGE_ID_HEADER};

use super::REQUEST_ID_HEADER;

/// Configure CORS from `CORS_ORIGINS`
///
/// An empty list or `*` allows any origin (development). Otherwise only the
/// listed origins are allowed; entries that are not valid header values are
/// skipped.
#[must_use]
pub fn setup_cors(config: &ServerConfig) -> CorsLayer {
    let wildcard = config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*");
    let allow_origin = if wildcard {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
            .collect();
        if origins.is_empty() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(origins)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("origin"),
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(TENANT_HEADER),
            HeaderName::from_static(PROFILE_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static(MESSAGE_ID_HEADER),
            HeaderName::from_static(CONVERSATION_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
}
