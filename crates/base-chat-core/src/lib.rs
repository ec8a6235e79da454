// ABOUTME: Core types for the Base Chat conversation engine
// ABOUTME: Foundation crate with error handling and tenant, conversation and message models
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

#![deny(unsafe_code)]

//! # Base Chat Core
//!
//! Foundation crate providing shared types for the Base Chat conversation
//! engine. It changes rarely, so the workspace keeps incremental builds fast.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError` and `ErrorCode`
//! - **models**: Tenants, identities, conversations, messages and sources

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Core data models (Tenant, Profile, Conversation, Message, Source)
pub mod models;
