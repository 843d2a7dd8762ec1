//! The deployer owns the deployment state and drives transitions.
//!
//! A transition runs the event loop: feed an event to the pure transition
//! function, execute the resulting effects, and feed the result events back
//! in until none remain. Only one transition runs at a time. Every
//! intermediate state is published so readers never wait on the lock.

use anyhow::Result;
use sideswap_core::Revision;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::event::{Event, TransitionStage};
use super::interpreter::{execute_effects, InterpreterContext, SideProcesses};
use super::state::{DeploymentState, SideLabel};
use super::transition::{transition, TransitionResult};
use crate::workspace::{self, SideLayout};

/// How a transition ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// `revision` is live on `side`.
    Deployed { side: SideLabel, revision: Revision },
    /// The candidate never went live; the previous side is still active.
    Abandoned {
        stage: TransitionStage,
        error: String,
    },
    /// The event loop ran dry before the revision went live, with no stage
    /// reporting a failure.
    Stalled { state: &'static str },
}

impl TransitionOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed { .. })
    }
}

pub struct Deployer {
    ctx: InterpreterContext,
    /// Transition lock. Held for the whole transition, external commands
    /// included.
    processes: Mutex<SideProcesses>,
    state: watch::Sender<DeploymentState>,
}

impl Deployer {
    pub fn new(ctx: InterpreterContext) -> Self {
        let (state, _) = watch::channel(DeploymentState::Cold);
        Self {
            ctx,
            processes: Mutex::new(SideProcesses::default()),
            state,
        }
    }

    pub fn layout(&self) -> &SideLayout {
        &self.ctx.layout
    }

    /// The most recently published state. Never blocks on a transition.
    pub fn snapshot(&self) -> DeploymentState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeploymentState> {
        self.state.subscribe()
    }

    /// Build `revision` on the inactive side, launch it, move traffic to it
    /// and retire the previous side.
    ///
    /// Waits for any transition already in progress. On failure the state
    /// and redirect target are left exactly as they were before the call.
    pub async fn transition(&self, revision: Revision) -> TransitionOutcome {
        let span = info_span!(
            "transition",
            id = %Uuid::new_v4(),
            revision = %revision.short()
        );
        self.run_transition(revision).instrument(span).await
    }

    async fn run_transition(&self, revision: Revision) -> TransitionOutcome {
        let mut processes = self.processes.lock().await;

        let mut current_state = self.snapshot().settled();
        let mut failure = None;
        let mut events_to_process = vec![Event::DeployRequested {
            revision: revision.clone(),
        }];

        while let Some(event) = events_to_process.pop() {
            debug!(
                "Processing event {} in state {}",
                event.log_summary(),
                current_state.state_name()
            );

            if let Some((stage, error)) = event.failure() {
                failure = Some((stage, error.to_string()));
            }

            let TransitionResult { state, effects } = transition(current_state, event);
            current_state = state;
            self.state.send_replace(current_state.clone());

            if !effects.is_empty() {
                let result_events = execute_effects(&self.ctx, &mut processes, effects).await;

                // Reverse so they are processed in the order produced
                for result_event in result_events.into_iter().rev() {
                    events_to_process.push(result_event);
                }
            }
        }

        if let Some((stage, error)) = failure {
            return TransitionOutcome::Abandoned { stage, error };
        }

        outcome_for(revision, &current_state)
    }

    /// Remove the active side's directory. Used on shutdown; the process
    /// itself is left running.
    pub async fn remove_active_directory(&self) -> Result<()> {
        let Some(side) = self.snapshot().active_label() else {
            return Ok(());
        };
        let dir = self.ctx.layout.dir(side);
        info!("Removing side {} directory {}", side, dir.display());
        workspace::remove_directory(&dir).await
    }
}

/// Outcome of a transition that recorded no stage failure.
fn outcome_for(revision: Revision, state: &DeploymentState) -> TransitionOutcome {
    match state.active() {
        Some(active) if state.is_settled() && active.revision == revision => {
            info!("Side {} now serving {}", active.label, revision.short());
            TransitionOutcome::Deployed {
                side: active.label,
                revision,
            }
        }
        _ => {
            error!(
                "Transition stopped in state {} without reaching {}",
                state.state_name(),
                revision.short()
            );
            TransitionOutcome::Stalled {
                state: state.state_name(),
            }
        }
    }
}
