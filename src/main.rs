// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod config;
mod daemon;
mod error;
mod exposition;
mod kubernetes;
mod policy;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

use cli::Args;
use config::Config;
use daemon::{MetricsServer, ScrapeHandler};
use kubernetes::{KubeFetcher, build_client, resolve_api_resource};
use policy::CompiledQuery;

/// Initialize logging to stderr, filtered by RUST_LOG when set
fn init_logging(verbose: bool) {
    let filter = if verbose {
        "kube_rego_exporter=debug"
    } else {
        "kube_rego_exporter=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::load(&args.config)?;
    let selector = config.group_version_resource.clone();

    // Compile once; a broken policy must stop startup, not fail every scrape
    let module = config.policy_module();
    let query = CompiledQuery::prepare(&module)
        .with_context(|| format!("Failed to compile policy for query '{}'", module.query()))?;
    info!(query = %query.query(), selector = %selector, "Policy compiled");

    let client = build_client(args.kubeconfig.as_deref(), args.context.as_deref()).await?;
    let api_resource = resolve_api_resource(&client, &selector).await?;

    let fetcher = Arc::new(KubeFetcher::new(client, selector.clone(), api_resource));
    let handler = Arc::new(ScrapeHandler::new(
        fetcher,
        query,
        selector,
        args.scrape_timeout(),
    ));

    MetricsServer::new(args.port, args.bind.clone())
        .run(handler)
        .await
}
