// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes client construction and resource resolution

use anyhow::{Context, Result, anyhow};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiResource, Discovery};
use kube::{Client, Config};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ResourceSelector;

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the kubeconfig comes from
#[derive(Debug, Clone, PartialEq, Eq)]
enum KubeconfigSource {
    /// Named by --kubeconfig or $KUBECONFIG; must exist
    Explicit(PathBuf),
    /// ~/.kube/config; in-cluster config is used when it is absent
    Default(PathBuf),
    /// No home directory to look in
    InCluster,
}

/// Resolve the kubeconfig location: flag, then $KUBECONFIG, then ~/.kube/config
fn kubeconfig_source(
    flag: Option<&Path>,
    env: Option<String>,
    home: Option<PathBuf>,
) -> KubeconfigSource {
    if let Some(path) = flag {
        return KubeconfigSource::Explicit(path.to_path_buf());
    }
    if let Some(env) = env.filter(|v| !v.is_empty()) {
        return KubeconfigSource::Explicit(PathBuf::from(env));
    }
    match home {
        Some(home) => KubeconfigSource::Default(home.join(".kube").join("config")),
        None => KubeconfigSource::InCluster,
    }
}

/// Build a client from the resolved kubeconfig (or in-cluster config)
pub async fn build_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    let source = kubeconfig_source(
        kubeconfig,
        std::env::var("KUBECONFIG").ok(),
        dirs::home_dir(),
    );

    let path = match source {
        KubeconfigSource::Explicit(path) => Some(path),
        KubeconfigSource::Default(path) if path.exists() => Some(path),
        KubeconfigSource::Default(path) => {
            debug!(path = %path.display(), "Default kubeconfig not found");
            None
        }
        KubeconfigSource::InCluster => None,
    };

    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(&path)
                .with_context(|| format!("Failed to read kubeconfig: {}", path.display()))?;
            Config::from_custom_kubeconfig(
                kubeconfig,
                &KubeConfigOptions {
                    context: context.map(String::from),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("Failed to build kubeconfig from {}", path.display()))?
        }
        None => {
            if context.is_some() {
                return Err(anyhow!("--context requires a kubeconfig"));
            }
            info!("Using in-cluster configuration");
            Config::incluster().context("Failed to load in-cluster configuration")?
        }
    };

    // Set timeouts for reliability
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Look up the selector through API discovery to learn its kind.
///
/// An unreachable cluster is not fatal here: the exporter still starts with an
/// API resource built from the selector alone. A reachable cluster that does
/// not serve the selector is a configuration error.
pub async fn resolve_api_resource(
    client: &Client,
    selector: &ResourceSelector,
) -> Result<ApiResource> {
    let discovery = match Discovery::new(client.clone())
        .filter(&[selector.group.as_str()])
        .run()
        .await
    {
        Ok(discovery) => discovery,
        Err(e) => {
            warn!(
                selector = %selector,
                error = %e,
                "Discovery failed, listing without resolved kind"
            );
            return Ok(selector.to_api_resource());
        }
    };

    for group in discovery.groups() {
        for (ar, _caps) in group.versioned_resources(&selector.version) {
            if ar.plural == selector.resource {
                info!(
                    selector = %selector,
                    kind = %ar.kind,
                    "Resolved resource"
                );
                return Ok(ar);
            }
        }
    }

    Err(anyhow!(
        "Resource '{}' is not served by the cluster",
        selector
    ))
}
