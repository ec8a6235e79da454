// ABOUTME: HTTP server assembly combining every route with tracing, request id and CORS layers
// ABOUTME: Binds the configured address and serves until ctrl-c or SIGTERM
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::{create_request_span, setup_cors, MakeRequestIdWithPrefix};
use crate::resources::ServerResources;
use crate::routes::{ChatRoutes, HealthRoutes, SlackRoutes, WidgetRoutes};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The chat HTTP server
pub struct ChatServer {
    resources: Arc<ServerResources>,
}

impl ChatServer {
    /// Create a server over shared resources
    #[must_use]
    pub const fn new(resources: Arc<ServerResources>) -> Self {
        Self { resources }
    }

    /// Build the full router with middleware applied
    pub fn router(&self) -> Router {
        let resources = &self.resources;
        Router::new()
            .merge(HealthRoutes::routes())
            .merge(ChatRoutes::routes(Arc::clone(resources)))
            .merge(WidgetRoutes::routes(Arc::clone(resources)))
            .merge(SlackRoutes::routes(Arc::clone(resources)))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(setup_cors(&resources.config))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(create_request_span))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestIdWithPrefix))
    }

    /// Serve until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails
    pub async fn run(self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.resources.config.host, self.resources.config.http_port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(%addr, "HTTP server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
