// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-scrape failures. Startup failures stay `anyhow::Error` and end the process.

use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to list resources: {0:#}")]
    Fetch(anyhow::Error),

    #[error("failed to evaluate policy: {0:#}")]
    Eval(anyhow::Error),

    #[error("scrape exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl ScrapeError {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Fetch(_) => "fetch",
            ScrapeError::Eval(_) => "eval",
            ScrapeError::Timeout(_) => "timeout",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ScrapeError::Fetch(_) => StatusCode::BAD_GATEWAY,
            ScrapeError::Eval(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ScrapeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}
