//! Startup reconciliation.
//!
//! Nothing survives a restart: the last deployed revision starts out empty,
//! so it always differs from upstream and the first transition is
//! unconditional. Until it succeeds there is nothing to serve, which makes
//! any failure here fatal.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sideswap_core::Revision;
use tracing::info;

use crate::github::GitHubClient;
use crate::state_machine::{Deployer, SideLabel, TransitionOutcome};

/// Where the revision that should be running comes from.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    async fn current_revision(&self) -> Result<Revision>;
}

/// Head of the deploy branch on GitHub.
pub struct GitHubRevisionSource {
    client: GitHubClient,
    repo: String,
    branch: String,
}

impl GitHubRevisionSource {
    pub fn new(client: GitHubClient, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            client,
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

#[async_trait]
impl RevisionSource for GitHubRevisionSource {
    async fn current_revision(&self) -> Result<Revision> {
        self.client.head_commit(&self.repo, &self.branch).await
    }
}

/// Deploy the current upstream revision before serving anything.
pub async fn reconcile_on_startup(
    deployer: &Deployer,
    source: &dyn RevisionSource,
) -> Result<(SideLabel, Revision)> {
    info!("Starting startup reconciliation...");

    let upstream = source
        .current_revision()
        .await
        .context("Failed to determine the current upstream revision")?;

    let last = deployer.snapshot().last_revision().cloned();
    if last.as_ref() == Some(&upstream) {
        info!("Already running {}. Reconciliation complete.", upstream.short());
        if let Some(side) = deployer.snapshot().active_label() {
            return Ok((side, upstream));
        }
    }

    info!(
        "Upstream is at {}, last deployed {}; deploying",
        upstream.short(),
        last.as_ref().map(Revision::short).unwrap_or("nothing")
    );

    match deployer.transition(upstream).await {
        TransitionOutcome::Deployed { side, revision } => {
            info!(
                "Initial deployment of {} live on side {}. Reconciliation complete.",
                revision.short(),
                side
            );
            Ok((side, revision))
        }
        TransitionOutcome::Abandoned { stage, error } => {
            bail!("Initial deployment failed during {}: {}", stage, error)
        }
        TransitionOutcome::Stalled { state } => {
            bail!("Initial deployment stalled in state {}", state)
        }
    }
}
