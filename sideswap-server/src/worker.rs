//! Background deploy worker.
//!
//! Webhook handlers do not run transitions themselves. They drop the
//! requested revision into a single-slot queue and return; one worker task
//! drains the slot. A request that arrives while another is still pending
//! replaces it, so a burst of pushes costs at most one extra transition.

use sideswap_core::Revision;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::state_machine::{Deployer, TransitionOutcome};

#[derive(Clone)]
pub struct DeployQueue {
    slot: Arc<watch::Sender<Option<Revision>>>,
}

impl Default for DeployQueue {
    fn default() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }
}

impl DeployQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `revision`, returning the pending revision it superseded.
    pub fn request(&self, revision: Revision) -> Option<Revision> {
        let mut superseded = None;
        self.slot.send_modify(|pending| superseded = pending.replace(revision));
        superseded
    }

    /// The revision waiting for the worker, if any.
    pub fn pending(&self) -> Option<Revision> {
        self.slot.borrow().clone()
    }

    fn take(&self) -> Option<Revision> {
        let mut taken = None;
        // Emptying the slot must not wake the worker again
        self.slot.send_if_modified(|pending| {
            taken = pending.take();
            false
        });
        taken
    }
}

/// Run queued transitions one at a time, forever.
pub async fn deploy_loop(deployer: Arc<Deployer>, queue: DeployQueue) {
    let mut wakeups = queue.slot.subscribe();

    loop {
        while let Some(revision) = queue.take() {
            info!("Starting deployment of {}", revision.short());
            let short = revision.short().to_string();

            match deployer.transition(revision).await {
                TransitionOutcome::Deployed { side, revision } => {
                    info!("Deployed {} on side {}", revision.short(), side);
                }
                TransitionOutcome::Abandoned { stage, error } => {
                    warn!("Deployment abandoned during {}: {}", stage, error);
                }
                TransitionOutcome::Stalled { state } => {
                    error!("Deployment of {} stalled in state {}", short, state);
                }
            }
        }

        if wakeups.changed().await.is_err() {
            // Unreachable while `queue` holds the sender
            break;
        }
    }
}
