//! Object-storage access for api description documents kept outside the template.
//!
//! The loader only needs "bucket/key/version -> bytes"; [`ObjectFetcher`] is that capability and
//! [`S3Fetcher`] backs it with the AWS SDK (optionally pointed at a local S3-compatible endpoint).

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;

/// Location of an object in S3-compatible storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub version: Option<String>,
}

impl ObjectLocation {
    /// Parse an `s3://bucket/key` URI. Returns `None` for anything else, including `s3://` URIs
    /// without a key.
    pub fn parse_s3_uri(s: &str) -> Option<Self> {
        let url = url::Url::parse(s).ok()?;
        if url.scheme() != "s3" {
            return None;
        }
        let bucket = url.host_str()?.to_string();
        let key = url.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return None;
        }
        Some(Self {
            bucket,
            key,
            version: None,
        })
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)?;
        if let Some(version) = &self.version {
            write!(f, "?versionId={version}")?;
        }
        Ok(())
    }
}

#[async_trait]
/// Fetches the bytes of a stored object.
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, location: &ObjectLocation) -> anyhow::Result<Bytes>;
}

/// AWS SDK implementation of [`ObjectFetcher`].
pub struct S3Fetcher {
    client: aws_sdk_s3::Client,
}

impl S3Fetcher {
    /// Create a fetcher using standard AWS credential resolution.
    pub async fn new(region: Option<String>, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint_url) = endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let cfg = loader.load().await;
        let s3_cfg = aws_sdk_s3::config::Builder::from(&cfg)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_cfg),
        }
    }
}

#[async_trait]
impl ObjectFetcher for S3Fetcher {
    async fn fetch(&self, location: &ObjectLocation) -> anyhow::Result<Bytes> {
        let out = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .set_version_id(location.version.clone())
            .send()
            .await
            .with_context(|| format!("get_object {location}"))?;
        let bytes = out
            .body
            .collect()
            .await
            .context("collect get_object body")?
            .into_bytes();
        Ok(bytes)
    }
}
