// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod http_server;

pub use http_server::{MetricsServer, ScrapeHandler};
