use anyhow::Context as _;
use async_trait::async_trait;
use bytes::Bytes;

/// Synchronously runs a function with a JSON payload and returns its raw output.
#[async_trait]
pub trait LambdaInvoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: Bytes) -> anyhow::Result<Bytes>;
}

pub struct AwsLambdaInvoker {
    client: aws_sdk_lambda::Client,
}

impl AwsLambdaInvoker {
    /// `endpoint_url` points the client at a local invoke endpoint instead of the cloud.
    pub async fn new(region: Option<String>, endpoint_url: Option<String>) -> anyhow::Result<Self> {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint_url) = endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let cfg = loader.load().await;
        let client = aws_sdk_lambda::Client::new(&cfg);
        Ok(Self { client })
    }
}

#[async_trait]
impl LambdaInvoker for AwsLambdaInvoker {
    async fn invoke(&self, function_name: &str, payload: Bytes) -> anyhow::Result<Bytes> {
        let out = self
            .client
            .invoke()
            .function_name(function_name)
            .payload(aws_sdk_lambda::primitives::Blob::new(payload))
            .send()
            .await
            .with_context(|| format!("invoke {function_name}"))?;

        if let Some(function_error) = out.function_error() {
            anyhow::bail!("lambda function error ({function_error}) for {function_name}");
        }

        Ok(out
            .payload()
            .map(|b| Bytes::copy_from_slice(b.as_ref()))
            .unwrap_or_default())
    }
}
