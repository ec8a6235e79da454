// ABOUTME: Re-export of the unified error types from the core crate
// ABOUTME: Lets modules write crate::errors::{AppError, AppResult} like the rest of the tree
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! Unified error handling, see [`base_chat_core::errors`]

pub use base_chat_core::errors::{
    AppError, AppResult, ErrorCode, ErrorContext, ErrorResponse, ErrorResponseDetails,
};
