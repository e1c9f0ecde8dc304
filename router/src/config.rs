//! Gateway configuration loaded from YAML.

use std::{net::SocketAddr, path::PathBuf};

use serde::Deserialize;

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_stage() -> String {
    "prod".to_string()
}

fn default_max_body_bytes() -> usize {
    6 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
/// Top-level gateway configuration.
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    /// Address the gateway listens on.
    pub listen_addr: SocketAddr,

    #[serde(default)]
    /// Path to the infrastructure template. May be supplied on the command line instead.
    pub template_path: Option<PathBuf>,

    #[serde(default = "default_stage")]
    /// Stage name reported in every event's request context.
    pub stage: String,

    #[serde(default)]
    /// Optional AWS region override for the Lambda and S3 clients.
    pub aws_region: Option<String>,

    #[serde(default)]
    /// Invoke endpoint for the Lambda client, e.g. a local runtime emulator.
    pub lambda_endpoint_url: Option<String>,

    #[serde(default)]
    /// Endpoint for fetching `s3://` definition documents.
    pub s3_endpoint_url: Option<String>,

    #[serde(default = "default_max_body_bytes")]
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            template_path: None,
            stage: default_stage(),
            aws_region: None,
            lambda_endpoint_url: None,
            s3_endpoint_url: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl GatewayConfig {
    /// Parse a YAML gateway config from bytes.
    pub fn from_yaml_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_slice(bytes)?)
    }
}
