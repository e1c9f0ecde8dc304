use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use apigw_local::{
    config::GatewayConfig,
    definition::DefinitionLoader,
    lambda::AwsLambdaInvoker,
    location::S3Fetcher,
    routes::{RouteHandle, RouteTable, RouterBuilder},
    server::{self, AppState},
    template::Template,
};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(about = "Serve a template's api routes locally, backed by Lambda invocations")]
struct Args {
    /// YAML gateway config.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Infrastructure template; overrides `template_path` from the config.
    #[arg(long)]
    template: Option<PathBuf>,
    /// Listen address; overrides `listen_addr` from the config.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("read config {}", path.display()))?;
            GatewayConfig::from_yaml_bytes(&bytes)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => GatewayConfig::default(),
    };
    if let Some(template) = args.template {
        cfg.template_path = Some(template);
    }
    if let Some(listen) = args.listen {
        cfg.listen_addr = listen;
    }
    let template_path = cfg
        .template_path
        .clone()
        .context("no template given; pass --template or set template_path in --config")?;

    tracing::info!(template = %template_path.display(), stage = %cfg.stage, "starting");

    let fetcher = S3Fetcher::new(cfg.aws_region.clone(), cfg.s3_endpoint_url.clone()).await;
    let loader = DefinitionLoader::with_fetcher(Arc::new(fetcher));
    let routes = RouteHandle::new(load_routes(&template_path, loader.clone()).await?);

    #[cfg(unix)]
    spawn_reload_on_sighup(routes.clone(), template_path, loader)?;

    let invoker = AwsLambdaInvoker::new(cfg.aws_region.clone(), cfg.lambda_endpoint_url.clone())
        .await?;
    let state = AppState::new(routes, Arc::new(invoker), cfg.max_body_bytes, &cfg.stage);
    server::run(cfg.listen_addr, state).await
}

async fn load_routes(template_path: &Path, loader: DefinitionLoader) -> anyhow::Result<RouteTable> {
    let bytes = tokio::fs::read(template_path)
        .await
        .with_context(|| format!("read template {}", template_path.display()))?;
    let base_dir = template_path.parent().unwrap_or_else(|| Path::new("."));
    let template = Template::from_slice(&bytes, base_dir)
        .with_context(|| format!("parse template {}", template_path.display()))?;

    let (builder, errors) = RouterBuilder::from_template(&template, loader).await;
    for err in &errors {
        tracing::warn!(resource = %err.resource(), error = %err, "resource contributed no routes");
    }
    let table = builder.build();
    tracing::info!(
        event = "routes_loaded",
        mounts = builder.mounts().len(),
        rejected = table.rejected().len(),
        skipped_resources = template.skipped.len() + errors.len(),
        "route table built"
    );
    Ok(table)
}

/// Rebuild the route table from the template whenever the process receives SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_sighup(
    routes: RouteHandle,
    template_path: PathBuf,
    loader: DefinitionLoader,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match load_routes(&template_path, loader.clone()).await {
                Ok(table) => {
                    routes.swap(table);
                    tracing::info!(event = "routes_reloaded", "route table replaced");
                }
                Err(err) => {
                    tracing::warn!(event = "reload_failed", error = %err, "keeping previous routes");
                }
            }
        }
    });
    Ok(())
}
