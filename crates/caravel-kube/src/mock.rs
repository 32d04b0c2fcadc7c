//! Scripted mocks for executor and resolver seams
//!
//! Used by the controller tests to drive the release state machine without a
//! cluster: each mock replays queued outcomes and records the calls made
//! against it.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use caravel_core::apps::AppType;

use crate::cluster::{ClusterHandle, ClusterResolver, ConnectionType};
use crate::error::{KubeError, Result};
use crate::executor::{
    DeployRequest, DeployStatus, DeployedRelease, ExecutorFactory, JobPhase, ReleaseExecutor,
};

/// Scripted outcome of a `get` call
#[derive(Debug, Clone)]
pub enum GetOutcome {
    /// Release has not materialized
    NotFound,
    /// Release exists with this status and description
    Status(DeployStatus, String),
}

/// Calls recorded by the mock executor
#[derive(Debug, Default, Clone)]
pub struct ExecutorCalls {
    pub installs: usize,
    pub upgrades: usize,
    pub uninstalls: usize,
    pub readiness_probes: usize,
    pub removed_jobs: Vec<String>,
}

#[derive(Default)]
struct MockState {
    gets: VecDeque<GetOutcome>,
    last_get: Option<GetOutcome>,
    install_error: Option<String>,
    ready_results: VecDeque<bool>,
    last_ready: bool,
    job_phases: VecDeque<JobPhase>,
    last_phase: Option<JobPhase>,
    calls: ExecutorCalls,
}

/// In-memory executor replaying scripted outcomes
#[derive(Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `get` outcome; the last queued outcome repeats once the
    /// queue drains.
    pub fn push_get(&self, outcome: GetOutcome) {
        self.state.lock().unwrap().gets.push_back(outcome);
    }

    /// Make install/upgrade fail with this message.
    pub fn fail_installs(&self, message: &str) {
        self.state.lock().unwrap().install_error = Some(message.to_string());
    }

    pub fn push_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready_results.push_back(ready);
    }

    pub fn push_job_phase(&self, phase: JobPhase) {
        self.state.lock().unwrap().job_phases.push_back(phase);
    }

    pub fn calls(&self) -> ExecutorCalls {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ReleaseExecutor for MockExecutor {
    async fn get(&self, release: &str) -> Result<DeployedRelease> {
        let mut state = self.state.lock().unwrap();
        let outcome = match state.gets.pop_front() {
            Some(o) => {
                state.last_get = Some(o.clone());
                o
            }
            None => state.last_get.clone().unwrap_or(GetOutcome::NotFound),
        };

        match outcome {
            GetOutcome::NotFound => Err(KubeError::ReleaseNotFound {
                name: release.to_string(),
                namespace: "default".to_string(),
            }),
            GetOutcome::Status(status, description) => Ok(DeployedRelease {
                status,
                description,
                manifest: String::new(),
                hook_manifests: Vec::new(),
            }),
        }
    }

    async fn install(&self, req: &DeployRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.installs += 1;
        match &state.install_error {
            Some(message) => Err(KubeError::InvalidManifest(message.clone())),
            None => Ok(format!("{}-install-job", req.release_name)),
        }
    }

    async fn upgrade(&self, req: &DeployRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.upgrades += 1;
        match &state.install_error {
            Some(message) => Err(KubeError::InvalidManifest(message.clone())),
            None => Ok(format!("{}-install-job", req.release_name)),
        }
    }

    async fn uninstall(&self, release: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.uninstalls += 1;
        Ok(format!("{}-uninstall", release))
    }

    async fn ready(&self, _release: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.readiness_probes += 1;
        let ready = match state.ready_results.pop_front() {
            Some(r) => {
                state.last_ready = r;
                r
            }
            None => state.last_ready,
        };
        Ok(ready)
    }

    async fn job_phase(&self, _job: &str) -> Result<JobPhase> {
        let mut state = self.state.lock().unwrap();
        let phase = match state.job_phases.pop_front() {
            Some(p) => {
                state.last_phase = Some(p);
                p
            }
            None => state.last_phase.unwrap_or(JobPhase::Active),
        };
        Ok(phase)
    }

    async fn remove_job(&self, job: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .removed_jobs
            .push(job.to_string());
        Ok(())
    }
}

/// Factory handing out one shared mock executor regardless of target
#[derive(Clone)]
pub struct MockExecutorFactory {
    executor: Arc<MockExecutor>,
}

impl MockExecutorFactory {
    pub fn new(executor: Arc<MockExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ExecutorFactory for MockExecutorFactory {
    async fn executor(
        &self,
        _app_type: AppType,
        _cluster: &ClusterHandle,
        _namespace: &str,
    ) -> Result<Arc<dyn ReleaseExecutor>> {
        Ok(self.executor.clone())
    }
}

/// Resolver serving a fixed set of clusters
#[derive(Clone, Default)]
pub struct MockClusterResolver {
    clusters: Arc<Mutex<HashMap<String, ClusterHandle>>>,
}

impl MockClusterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str) {
        self.add_handle(ClusterHandle {
            name: name.to_string(),
            kubeconfig: Vec::new(),
            connection: ConnectionType::Direct,
            deleting: false,
        });
    }

    pub fn add_handle(&self, handle: ClusterHandle) {
        self.clusters
            .lock()
            .unwrap()
            .insert(handle.name.clone(), handle);
    }

    pub fn mark_deleting(&self, name: &str) {
        if let Some(handle) = self.clusters.lock().unwrap().get_mut(name) {
            handle.deleting = true;
        }
    }

    pub fn remove(&self, name: &str) {
        self.clusters.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl ClusterResolver for MockClusterResolver {
    async fn runtime_client(&self, _cluster: &str) -> Result<kube::Client> {
        Err(KubeError::Unsupported(
            "mock resolver has no runtime clients".to_string(),
        ))
    }

    async fn get(&self, cluster: &str) -> Result<ClusterHandle> {
        self.clusters
            .lock()
            .unwrap()
            .get(cluster)
            .cloned()
            .ok_or_else(|| KubeError::ClusterNotFound {
                name: cluster.to_string(),
            })
    }
}
