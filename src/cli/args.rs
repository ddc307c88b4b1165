// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "kube-rego-exporter")]
#[command(
    author,
    version,
    about = "Expose Kubernetes resources as Prometheus metrics through a Rego policy"
)]
pub struct Args {
    /// Path to a kubeconfig. Only required if out-of-cluster.
    /// Falls back to $KUBECONFIG, then ~/.kube/config, then in-cluster config.
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Path to the GVR/Rego configuration file
    #[arg(long, value_name = "PATH", default_value = "./config.yaml")]
    pub config: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Per-scrape deadline in seconds (fetch + evaluation)
    #[arg(
        long,
        value_name = "SECS",
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["kube-rego-exporter"]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.bind, "0.0.0.0");
        assert_eq!(args.config, PathBuf::from("./config.yaml"));
        assert!(args.kubeconfig.is_none());
        assert_eq!(args.scrape_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_explicit_flags() {
        let args = Args::parse_from([
            "kube-rego-exporter",
            "--kubeconfig",
            "/tmp/kc",
            "--config",
            "/etc/exporter/config.yaml",
            "--port",
            "9100",
        ]);
        assert_eq!(args.kubeconfig, Some(PathBuf::from("/tmp/kc")));
        assert_eq!(args.config, PathBuf::from("/etc/exporter/config.yaml"));
        assert_eq!(args.port, 9100);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = Args::try_parse_from(["kube-rego-exporter", "--timeout", "0"]);
        assert!(result.is_err());

        let args = Args::try_parse_from(["kube-rego-exporter", "--timeout", "1"]).unwrap();
        assert_eq!(args.scrape_timeout(), Duration::from_secs(1));
    }
}
