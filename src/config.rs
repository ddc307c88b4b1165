// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Exporter configuration
//!
//! A single YAML document naming the resource collection to fetch and the
//! Rego module that turns it into metric lines:
//!
//! ```yaml
//! groupVersionResource:
//!   group: apps
//!   version: v1
//!   resource: deployments
//! stub: |
//!   package stub
//!   printer[line] { ... }
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::kubernetes::ResourceSelector;
use crate::policy::{DEFAULT_QUERY, PolicyModule};

/// Exporter configuration, loaded once at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Resource collection fetched on every scrape
    pub group_version_resource: ResourceSelector,
    /// Rego module source
    pub stub: String,
    /// Query evaluated against the module
    #[serde(default = "default_query")]
    pub query: String,
}

fn default_query() -> String {
    DEFAULT_QUERY.to_string()
}

impl Config {
    /// Read, parse and validate the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let path = sanitize_path(path)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a configuration document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(content).context("Failed to parse config document")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let gvr = &self.group_version_resource;
        if gvr.version.trim().is_empty() {
            bail!("groupVersionResource.version must not be empty");
        }
        if gvr.resource.trim().is_empty() {
            bail!("groupVersionResource.resource must not be empty");
        }
        if gvr.resource.contains('/') {
            bail!(
                "groupVersionResource.resource '{}' must not name a subresource",
                gvr.resource
            );
        }
        if self.stub.trim().is_empty() {
            bail!("stub must not be empty");
        }
        if self.query.trim().is_empty() {
            bail!("query must not be empty");
        }
        Ok(())
    }

    /// The policy module described by this configuration
    pub fn policy_module(&self) -> PolicyModule {
        PolicyModule::new(self.stub.clone(), self.query.clone())
    }
}

/// Make a path absolute and lexically normalized (`.` and `..` removed)
fn sanitize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Failed to resolve absolute path: {}", path.display()))?;

    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other),
        }
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
groupVersionResource:
  group: apps
  version: v1
  resource: deployments
stub: |
  package stub

  printer {
    print("up 1")
  }
"#;

    #[test]
    fn test_config_parse() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.group_version_resource.group, "apps");
        assert_eq!(config.group_version_resource.version, "v1");
        assert_eq!(config.group_version_resource.resource, "deployments");
        assert!(config.stub.starts_with("package stub"));
        assert_eq!(config.query, DEFAULT_QUERY);
    }

    #[test]
    fn test_config_core_group_may_be_omitted() {
        let yaml = "groupVersionResource:\n  version: v1\n  resource: pods\nstub: package stub\n";
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.group_version_resource.group, "");
        assert_eq!(config.group_version_resource.api_version(), "v1");
    }

    #[test]
    fn test_config_custom_query() {
        let yaml = "groupVersionResource:\n  version: v1\n  resource: pods\nstub: package stub\nquery: data.stub.lines\n";
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.query, "data.stub.lines");
    }

    #[test]
    fn test_config_missing_resource() {
        let yaml = "groupVersionResource:\n  version: v1\n  resource: \"\"\nstub: package stub\n";
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("resource"));
    }

    #[test]
    fn test_config_subresource_rejected() {
        let yaml = "groupVersionResource:\n  version: v1\n  resource: pods/log\nstub: package stub\n";
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_config_empty_stub() {
        let yaml = "groupVersionResource:\n  version: v1\n  resource: pods\nstub: \"\"\n";
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_config_malformed() {
        assert!(Config::parse("groupVersionResource: [").is_err());
        assert!(Config::parse("stub: package stub\n").is_err());
    }

    #[test]
    fn test_config_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, SAMPLE).unwrap();

        // Route through a `..` segment to exercise path cleaning
        let indirect = temp_dir.path().join("sub").join("..").join("config.yaml");
        let config = Config::load(&indirect).unwrap();
        assert_eq!(config.group_version_resource.resource, "deployments");
    }

    #[test]
    fn test_config_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Config::load(&temp_dir.path().join("nope.yaml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }

    #[test]
    fn test_sanitize_path() {
        let clean = sanitize_path(Path::new("/a/./b/../c.yaml")).unwrap();
        assert_eq!(clean, PathBuf::from("/a/c.yaml"));
    }
}
