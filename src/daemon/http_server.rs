// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::error::ScrapeError;
use crate::exposition::ExpositionFormat;
use crate::kubernetes::{ResourceFetcher, ResourceSelector};
use crate::policy::{CompiledQuery, EvaluationOutput};

/// Evaluation slots when the host parallelism cannot be determined
const DEFAULT_MAX_EVALUATIONS: usize = 4;

/// Runs one fetch-evaluate cycle per scrape.
///
/// Everything it holds is shared read-only between concurrent requests.
///
/// Evaluation runs on the blocking pool and cannot be interrupted: when the
/// deadline fires the client gets a 504, but the evaluation keeps its thread
/// until it finishes. At most one evaluation per available CPU runs at once;
/// a scrape waiting for a slot spends its own deadline doing so.
pub struct ScrapeHandler {
    fetcher: Arc<dyn ResourceFetcher>,
    query: Arc<CompiledQuery>,
    selector: ResourceSelector,
    timeout: Duration,
    evaluations: Arc<Semaphore>,
}

impl ScrapeHandler {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        query: CompiledQuery,
        selector: ResourceSelector,
        timeout: Duration,
    ) -> Self {
        let max_evaluations = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(DEFAULT_MAX_EVALUATIONS);
        Self {
            fetcher,
            query: Arc::new(query),
            selector,
            timeout,
            evaluations: Arc::new(Semaphore::new(max_evaluations)),
        }
    }

    /// Fetch and evaluate within the scrape deadline
    pub async fn scrape(&self) -> Result<EvaluationOutput, ScrapeError> {
        tokio::time::timeout(self.timeout, self.fetch_and_evaluate())
            .await
            .map_err(|_| ScrapeError::Timeout(self.timeout))?
    }

    async fn fetch_and_evaluate(&self) -> Result<EvaluationOutput, ScrapeError> {
        let start = Instant::now();
        let items = self
            .fetcher
            .list(&self.selector)
            .await
            .map_err(ScrapeError::Fetch)?;
        let fetched_ms = start.elapsed().as_millis() as u64;

        let item_count = items.len();
        let permit = Arc::clone(&self.evaluations)
            .acquire_owned()
            .await
            .map_err(|e| ScrapeError::Eval(e.into()))?;
        let query = Arc::clone(&self.query);
        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            query.evaluate(&items)
        })
        .await
            .map_err(|e| ScrapeError::Eval(e.into()))?
            .map_err(ScrapeError::Eval)?;

        debug!(
            selector = %self.selector,
            items = item_count,
            lines = output.fragments().len(),
            fetch_ms = fetched_ms,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Scrape complete"
        );

        Ok(output)
    }

    pub fn selector(&self) -> &ResourceSelector {
        &self.selector
    }
}

/// Routes: `/metrics` (any method) and `/healthz`
pub fn router(handler: Arc<ScrapeHandler>) -> Router {
    Router::new()
        .route("/metrics", any(metrics_handler))
        .route("/healthz", get(health_handler))
        .with_state(handler)
}

async fn metrics_handler(
    State(handler): State<Arc<ScrapeHandler>>,
    headers: HeaderMap,
) -> Response {
    let format = ExpositionFormat::negotiate(
        headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
    );

    match handler.scrape().await {
        Ok(output) => (
            [(CONTENT_TYPE, format.content_type())],
            format.render(&output),
        )
            .into_response(),
        Err(e) => {
            error!(
                selector = %handler.selector(),
                kind = e.kind(),
                error = %e,
                "Scrape failed"
            );
            (
                e.status(),
                [(CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("{}\n", e),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok\n")
}

/// HTTP server exposing the metrics endpoint
pub struct MetricsServer {
    port: u16,
    bind_address: String,
}

impl MetricsServer {
    pub fn new(port: u16, bind_address: String) -> Self {
        Self { port, bind_address }
    }

    pub async fn run(&self, handler: Arc<ScrapeHandler>) -> anyhow::Result<()> {
        let server_addr = format!("{}:{}", self.bind_address, self.port);
        let listener = TcpListener::bind(&server_addr)
            .await
            .with_context(|| format!("Failed to bind {}", server_addr))?;

        info!(
            address = %server_addr,
            selector = %handler.selector(),
            "Starting metrics server"
        );

        axum::serve(listener, router(handler))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Metrics server failed")?;

        info!("Metrics server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
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
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
