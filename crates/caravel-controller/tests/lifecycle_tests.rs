//! Lifecycle tests running the release reconciler through the work queue
//!
//! Unit tests call `reconcile` directly; these drive the same path the
//! daemon uses: keys enqueued on a `WorkQueue`, a worker pool invoking the
//! reconciler, requeue-after delays re-delivering keys. Time is paused so
//! the 5s polling delays advance instantly.

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;

use caravel_controller::{MemoryReleaseStore, ReleaseReconciler, WorkQueue, run_workers};
use caravel_core::apps::{AppType, ApplicationVersion, ApplicationVersionSpec};
use caravel_core::release::{ApplicationRelease, ReleasePhase, ReleaseSpec};
use caravel_core::{CLUSTER_LABEL, NAMESPACE_LABEL};
use caravel_kube::executor::{DeployStatus, JobPhase};
use caravel_kube::mock::{GetOutcome, MockClusterResolver, MockExecutor, MockExecutorFactory};
use caravel_repo::catalog::{CatalogStore, MemoryCatalog};
use caravel_store::fetch::{PackageFetcher, PackageResolver};
use caravel_store::{ArtifactStore, MemoryStore, TieredStore};

const RELEASE: &str = "web";
const VERSION_ID: &str = "bitnami-nginx-15.0.0";

struct Harness {
    reconciler: Arc<ReleaseReconciler>,
    releases: MemoryReleaseStore,
    executor: Arc<MockExecutor>,
}

async fn harness() -> Harness {
    let releases = MemoryReleaseStore::new();
    let catalog = MemoryCatalog::new();
    let clusters = MockClusterResolver::new();
    clusters.add("east");
    let executor = Arc::new(MockExecutor::new());
    let artifacts = Arc::new(MemoryStore::new());

    artifacts
        .upload(VERSION_ID, bytes::Bytes::from_static(b"chart"))
        .await
        .unwrap();
    catalog
        .create_version(&ApplicationVersion::new(
            VERSION_ID,
            ApplicationVersionSpec {
                version_name: "15.0.0".to_string(),
                app_type: AppType::Helm,
                digest: Some("abc".to_string()),
                pull_url: None,
                package_key: Some(VERSION_ID.to_string()),
                description: None,
                icon: None,
                created: None,
                maintainers: vec![],
            },
        ))
        .await
        .unwrap();

    let reconciler = Arc::new(ReleaseReconciler::new(
        Arc::new(releases.clone()),
        Arc::new(catalog),
        Arc::new(clusters),
        Arc::new(MockExecutorFactory::new(executor.clone())),
        Arc::new(PackageResolver::new(
            TieredStore::small_only(artifacts.clone()),
            PackageFetcher::new().unwrap(),
        )),
        artifacts,
    ));

    Harness {
        reconciler,
        releases,
        executor,
    }
}

fn release() -> ApplicationRelease {
    let mut release = ApplicationRelease::new(
        RELEASE,
        ReleaseSpec {
            app_type: AppType::Helm,
            app_version_id: VERSION_ID.to_string(),
            values: None,
        },
    );
    let labels = release.labels_mut();
    labels.insert(CLUSTER_LABEL.to_string(), "east".to_string());
    labels.insert(NAMESPACE_LABEL.to_string(), "prod".to_string());
    release
}

fn spawn_workers(h: &Harness, queue: &Arc<WorkQueue>) -> tokio::task::JoinHandle<()> {
    let handler = {
        let reconciler = Arc::clone(&h.reconciler);
        move |key: String| {
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.reconcile(&key).await }
        }
    };
    tokio::spawn(run_workers(Arc::clone(queue), 2, handler))
}

/// Poll until the predicate holds, advancing paused time past requeue delays.
async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn queued_release_converges_to_active() {
    let h = harness().await;
    h.releases.insert(release());
    h.executor.push_get(GetOutcome::Status(
        DeployStatus::Deployed,
        "Install complete".to_string(),
    ));

    let queue = WorkQueue::new();
    let workers = spawn_workers(&h, &queue);
    queue.add(RELEASE);

    let releases = h.releases.clone();
    wait_for(|| releases.snapshot(RELEASE).map(|r| r.phase()) == Some(ReleasePhase::Active)).await;

    assert_eq!(h.executor.calls().installs, 1);
    assert!(h.releases.has_finalizer(RELEASE));

    queue.shutdown();
    workers.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn queued_delete_uninstalls_and_collects_the_object() {
    let h = harness().await;
    h.releases.insert(release());
    h.executor.push_get(GetOutcome::Status(
        DeployStatus::Deployed,
        "Install complete".to_string(),
    ));

    let queue = WorkQueue::new();
    let workers = spawn_workers(&h, &queue);
    queue.add(RELEASE);

    let releases = h.releases.clone();
    wait_for(|| releases.snapshot(RELEASE).map(|r| r.phase()) == Some(ReleasePhase::Active)).await;

    // Deletion request re-delivers the key, as a watch event would
    h.releases.request_delete(RELEASE);
    h.executor.push_job_phase(JobPhase::Complete);
    queue.add(RELEASE);

    let releases = h.releases.clone();
    wait_for(|| !releases.exists(RELEASE)).await;

    assert_eq!(h.executor.calls().uninstalls, 1);
    assert!(
        h.executor
            .calls()
            .removed_jobs
            .contains(&format!("{}-uninstall", RELEASE))
    );

    queue.shutdown();
    workers.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn queued_install_failure_settles_in_failed() {
    let h = harness().await;
    h.releases.insert(release());
    h.executor.fail_installs("chart is malformed");

    let queue = WorkQueue::new();
    let workers = spawn_workers(&h, &queue);
    queue.add(RELEASE);

    let releases = h.releases.clone();
    wait_for(|| releases.snapshot(RELEASE).map(|r| r.phase()) == Some(ReleasePhase::Failed)).await;

    let message = h
        .releases
        .snapshot(RELEASE)
        .unwrap()
        .status
        .unwrap()
        .message
        .unwrap();
    assert!(message.contains("chart is malformed"));
    // Settled: the queue drains without re-delivering the key
    assert_eq!(h.executor.calls().installs, 1);

    queue.shutdown();
    workers.await.unwrap();
}
