//! Caravel control-plane daemon
//!
//! Watches `ApplicationRelease` and `Repo` objects on the host cluster,
//! feeds their keys into per-controller work queues and runs the
//! reconcilers on fixed worker pools until interrupted.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use caravel_controller::{
    KubeCatalog, KubeReleaseStore, KubeRepoStore, ReleaseReconciler, RepoReconciler, WorkQueue,
    run_workers,
};
use caravel_core::release::ApplicationRelease;
use caravel_core::repo::Repo;
use caravel_kube::StandardExecutorFactory;
use caravel_repo::Synchronizer;
use caravel_store::fetch::{PackageFetcher, PackageResolver};
use caravel_store::{ArtifactStore, ConfigMapStore, S3Config, S3Store, TieredStore};

mod config;
mod logging;
mod resolver;

use config::DaemonConfig;
use resolver::SecretClusterResolver;

#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "caravel-daemon")]
#[command(version)]
#[command(about = "Application release orchestration for multi-cluster Kubernetes", long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, env = "CARAVEL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter
    #[arg(long, env = "CARAVEL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, &cli.log_format)?;

    let config = match &cli.config {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::default(),
    };

    let host = Client::try_default().await?;
    tracing::info!(namespace = %config.system_namespace, "caravel daemon starting");

    // Artifact storage: ConfigMaps always, S3 layered on top when configured
    let small: Arc<dyn ArtifactStore> =
        Arc::new(ConfigMapStore::new(host.clone(), &config.system_namespace));
    let large: Option<Arc<dyn ArtifactStore>> = match &config.object_store {
        Some(os) => {
            let s3 = S3Store::new(S3Config {
                bucket: os.bucket.clone(),
                region: os.region.clone(),
                endpoint: os.endpoint.clone(),
                force_path_style: os.force_path_style,
                prefix: os.prefix.clone(),
                access_key: os.access_key.clone(),
                secret_key: os.secret_key.clone(),
            })
            .await;
            tracing::info!(bucket = %os.bucket, "large-object store configured");
            Some(Arc::new(s3))
        }
        None => None,
    };
    let artifacts = TieredStore::new(small, large);
    let packages = Arc::new(PackageResolver::new(
        artifacts.clone(),
        PackageFetcher::new()?,
    ));

    let resolver = Arc::new(SecretClusterResolver::new(
        host.clone(),
        &config.system_namespace,
    ));
    let mut factory =
        StandardExecutorFactory::new(resolver.clone(), host.clone(), &config.helm_image);
    if let Some(sa) = &config.helm_service_account {
        factory = factory.with_service_account(sa);
    }

    let release_reconciler = Arc::new(ReleaseReconciler::new(
        Arc::new(KubeReleaseStore::new(host.clone())),
        Arc::new(KubeCatalog::new(host.clone())),
        resolver,
        Arc::new(factory),
        packages,
        Arc::new(artifacts.clone()),
    ));

    let repo_reconciler = Arc::new(RepoReconciler::new(
        Arc::new(KubeRepoStore::new(host.clone())),
        Synchronizer::new(KubeCatalog::new(host.clone()))
            .with_artifacts(Arc::new(artifacts)),
    ));

    let release_queue = WorkQueue::new();
    let repo_queue = WorkQueue::new();

    tokio::spawn(watch_keys::<ApplicationRelease>(
        host.clone(),
        Arc::clone(&release_queue),
        config.watch_retry,
    ));
    tokio::spawn(watch_keys::<Repo>(
        host.clone(),
        Arc::clone(&repo_queue),
        config.watch_retry,
    ));

    let release_handler = {
        let reconciler = Arc::clone(&release_reconciler);
        move |key: String| {
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.reconcile(&key).await }
        }
    };
    let repo_handler = {
        let reconciler = Arc::clone(&repo_reconciler);
        move |key: String| {
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.reconcile(&key).await }
        }
    };

    let release_workers = tokio::spawn(run_workers(
        Arc::clone(&release_queue),
        config.release_workers,
        release_handler,
    ));
    let repo_workers = tokio::spawn(run_workers(
        Arc::clone(&repo_queue),
        config.repo_workers,
        repo_handler,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, draining work queues");
    release_queue.shutdown();
    repo_queue.shutdown();
    let _ = tokio::join!(release_workers, repo_workers);

    Ok(())
}

/// Translate watch events for one resource kind into work-queue keys,
/// restarting the stream after failures.
async fn watch_keys<K>(client: Client, queue: Arc<WorkQueue>, retry: Duration)
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug
        + Send
        + 'static,
{
    let api: Api<K> = Api::all(client);
    loop {
        let mut stream = watcher(api.clone(), watcher::Config::default()).boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(obj))
                | Ok(watcher::Event::InitApply(obj))
                | Ok(watcher::Event::Delete(obj)) => {
                    queue.add(&obj.name_any());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "watch stream failed, restarting");
                    break;
                }
            }
        }
        tokio::time::sleep(retry).await;
    }
}
