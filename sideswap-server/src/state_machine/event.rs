//! Events that drive side transitions.
//!
//! Events represent things that happened: a deploy was requested, or an
//! effect finished (successfully or not). They are inputs to the pure
//! transition function.

use chrono::{DateTime, Utc};
use sideswap_core::Revision;
use std::fmt;

use super::state::SideLabel;

/// Stage of a transition at which it can be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionStage {
    /// Creating or wiping the side directory.
    Prepare,
    /// Producing a clean, revision-pinned source tree.
    Materialize,
    Build,
    Launch,
    /// Waiting for the launched process to accept connections.
    Readiness,
}

impl fmt::Display for TransitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::Materialize => "materialize",
            Self::Build => "build",
            Self::Launch => "launch",
            Self::Readiness => "readiness",
        };
        write!(f, "{}", name)
    }
}

/// All events that can trigger state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // =========================================================================
    // Requests
    // =========================================================================
    /// Bring `revision` up on the inactive side and move traffic to it.
    DeployRequested { revision: Revision },

    // =========================================================================
    // Candidate Progress
    // =========================================================================
    /// The side directory exists and is empty.
    DirectoryPrepared { side: SideLabel },

    /// The revision has been checked out into the side directory.
    Materialized { side: SideLabel },

    /// The artifact was built successfully.
    Built { side: SideLabel },

    /// The artifact is running on the side's port.
    Launched { side: SideLabel, pid: u32 },

    /// The launched process accepts connections.
    Ready { side: SideLabel },

    /// A stage failed; the candidate will never go live.
    StageFailed {
        side: SideLabel,
        stage: TransitionStage,
        error: String,
    },

    // =========================================================================
    // Cutover
    // =========================================================================
    /// The redirect table now points at `side`.
    TargetSwapped {
        side: SideLabel,
        swapped_at: DateTime<Utc>,
    },

    /// The previous side's process was killed and its directory removed.
    Retired { side: SideLabel },

    /// Tearing down the previous side failed. Traffic is unaffected.
    RetireFailed { side: SideLabel, error: String },
}

impl Event {
    /// One-line description for logs.
    pub fn log_summary(&self) -> String {
        match self {
            Self::DeployRequested { revision } => {
                format!("DeployRequested({})", revision.short())
            }
            Self::DirectoryPrepared { side } => format!("DirectoryPrepared(side {})", side),
            Self::Materialized { side } => format!("Materialized(side {})", side),
            Self::Built { side } => format!("Built(side {})", side),
            Self::Launched { side, pid } => format!("Launched(side {}, pid {})", side, pid),
            Self::Ready { side } => format!("Ready(side {})", side),
            Self::StageFailed { side, stage, .. } => {
                format!("StageFailed(side {}, {})", side, stage)
            }
            Self::TargetSwapped { side, .. } => format!("TargetSwapped(side {})", side),
            Self::Retired { side } => format!("Retired(side {})", side),
            Self::RetireFailed { side, .. } => format!("RetireFailed(side {})", side),
        }
    }

    /// The stage and error if this event abandons a transition.
    pub fn failure(&self) -> Option<(TransitionStage, &str)> {
        match self {
            Self::StageFailed { stage, error, .. } => Some((*stage, error.as_str())),
            _ => None,
        }
    }
}
