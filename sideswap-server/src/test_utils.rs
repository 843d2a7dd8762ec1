//! Scripted stand-ins for the external collaborators, shared by unit and
//! integration tests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sideswap_core::Revision;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::materializer::Materializer;
use crate::reconciliation::RevisionSource;
use crate::redirect::RedirectTable;
use crate::state_machine::{Deployer, InterpreterContext};
use crate::supervisor::{ProcessHandle, ProcessSupervisor};
use crate::workspace::SideLayout;
use crate::worker::DeployQueue;
use crate::AppState;

/// File the fake build writes into a side directory.
pub const FAKE_ARTIFACT: &str = "artifact";

/// File the fake materialization writes, holding the revision.
const REVISION_FILE: &str = "REVISION";

/// Materializer that writes marker files instead of running git and a
/// compiler. Revisions can be scripted to fail at either stage.
#[derive(Default)]
pub struct FakeMaterializer {
    fail_materialize: HashSet<String>,
    fail_build: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    materialized: Mutex<Vec<Revision>>,
}

impl FakeMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_materialize(mut self, revision: &str) -> Self {
        self.fail_materialize.insert(revision.to_string());
        self
    }

    pub fn failing_build(mut self, revision: &str) -> Self {
        self.fail_build.insert(revision.to_string());
        self
    }

    /// Make each stage take at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Revisions materialized so far, in order.
    pub fn materialized(&self) -> Vec<Revision> {
        self.materialized.lock().unwrap().clone()
    }

    /// Highest number of stages observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn busy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Materializer for FakeMaterializer {
    async fn materialize(&self, revision: &Revision, dir: &Path) -> Result<()> {
        self.busy().await;
        if self.fail_materialize.contains(revision.as_str()) {
            bail!("fetch of {} failed", revision);
        }
        self.materialized.lock().unwrap().push(revision.clone());
        tokio::fs::write(dir.join(REVISION_FILE), revision.as_str())
            .await
            .context("Failed to write revision marker")
    }

    async fn build(&self, dir: &Path) -> Result<()> {
        self.busy().await;
        let revision = tokio::fs::read_to_string(dir.join(REVISION_FILE))
            .await
            .context("Nothing materialized to build")?;
        if self.fail_build.contains(&revision) {
            bail!("build of {} failed", revision);
        }
        tokio::fs::write(dir.join(FAKE_ARTIFACT), revision)
            .await
            .context("Failed to write artifact")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub dir: PathBuf,
    pub port: u16,
    pub pid: u32,
}

/// Supervisor that hands out fake pids and records what it was asked to do.
pub struct FakeSupervisor {
    next_pid: AtomicU32,
    fail_launch: AtomicBool,
    ready: AtomicBool,
    launched: Mutex<Vec<LaunchRecord>>,
    terminated: Mutex<Vec<u32>>,
}

impl Default for FakeSupervisor {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            fail_launch: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            launched: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Whether launched processes pass the readiness probe.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<LaunchRecord> {
        self.launched.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn launch(&self, dir: &Path, port: u16) -> Result<ProcessHandle> {
        if self.fail_launch.load(Ordering::SeqCst) {
            bail!("exec format error");
        }
        if !dir.join(FAKE_ARTIFACT).exists() {
            bail!("no artifact in {}", dir.display());
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.launched.lock().unwrap().push(LaunchRecord {
            dir: dir.to_path_buf(),
            port,
            pid,
        });
        Ok(ProcessHandle::detached(pid))
    }

    async fn terminate(&self, handle: Option<ProcessHandle>) -> Result<()> {
        if let Some(handle) = handle {
            self.terminated.lock().unwrap().push(handle.pid());
        }
        Ok(())
    }

    async fn wait_ready(&self, port: u16, _timeout: Duration) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            bail!("nothing listening on port {}", port)
        }
    }
}

/// Revision source that answers with a fixed revision, or fails.
pub struct FixedRevisionSource(pub Option<Revision>);

#[async_trait]
impl RevisionSource for FixedRevisionSource {
    async fn current_revision(&self) -> Result<Revision> {
        match &self.0 {
            Some(revision) => Ok(revision.clone()),
            None => bail!("upstream unavailable"),
        }
    }
}

/// An `AppState` wired to fakes, with no deploy worker running.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub materializer: Arc<FakeMaterializer>,
    pub supervisor: Arc<FakeSupervisor>,
}

pub fn test_app(work_root: &Path, webhook_secret: &str) -> Result<TestApp> {
    let materializer = Arc::new(FakeMaterializer::new());
    let supervisor = Arc::new(FakeSupervisor::new());
    let redirect = Arc::new(RedirectTable::new());
    let deployer = Deployer::new(InterpreterContext {
        materializer: materializer.clone(),
        supervisor: supervisor.clone(),
        redirect: redirect.clone(),
        layout: SideLayout::new(work_root, "app", 8080),
        readiness_timeout: None,
    });

    let state = Arc::new(AppState {
        deployer: Arc::new(deployer),
        deploy_queue: DeployQueue::new(),
        redirect,
        proxy_client: crate::proxy::proxy_client()?,
        webhook_secret: webhook_secret.to_string(),
        deploy_branch: "master".to_string(),
    });

    Ok(TestApp {
        state,
        materializer,
        supervisor,
    })
}
