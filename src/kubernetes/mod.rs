// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod client;
mod fetcher;

pub use client::{build_client, resolve_api_resource};
pub use fetcher::{KubeFetcher, ResourceFetcher};

use kube::discovery::ApiResource;
use serde::Deserialize;
use std::fmt;

/// Identifies the resource collection listed on every scrape
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ResourceSelector {
    /// API group (empty string for core v1)
    #[serde(default)]
    pub group: String,
    /// API version
    pub version: String,
    /// Plural resource name (e.g., "deployments")
    pub resource: String,
}

impl ResourceSelector {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Full API group/version string (e.g., "v1", "apps/v1")
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// API resource built from the selector alone, without discovery.
    /// The kind is unknown and left empty; listing only needs the plural.
    pub fn to_api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: String::new(),
            plural: self.resource.clone(),
        }
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version_core() {
        let selector = ResourceSelector::new("", "v1", "pods");
        assert_eq!(selector.api_version(), "v1");
        assert_eq!(selector.to_string(), "v1/pods");
    }

    #[test]
    fn test_api_version_grouped() {
        let selector = ResourceSelector::new("apps", "v1", "deployments");
        assert_eq!(selector.api_version(), "apps/v1");
        assert_eq!(selector.to_string(), "apps/v1/deployments");
    }

    #[test]
    fn test_to_api_resource() {
        let ar = ResourceSelector::new("cert-manager.io", "v1", "certificates").to_api_resource();
        assert_eq!(ar.group, "cert-manager.io");
        assert_eq!(ar.api_version, "cert-manager.io/v1");
        assert_eq!(ar.plural, "certificates");
        assert!(ar.kind.is_empty());
    }
}
