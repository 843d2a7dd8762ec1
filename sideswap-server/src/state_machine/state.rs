//! State types for the side-switching state machine.
//!
//! Following the principle of "make illegal states unrepresentable", at most
//! one side is ever active and a candidate only exists mid-transition.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sideswap_core::Revision;
use std::fmt;

/// One of the two physical deployment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SideLabel {
    One,
    Two,
}

impl SideLabel {
    pub const ALL: [SideLabel; 2] = [SideLabel::One, SideLabel::Two];

    /// Numeric label, used for directory names and port derivation.
    pub fn number(self) -> u16 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    pub fn complement(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    /// The side a transition should build into, given the active side.
    /// With nothing active yet, side 1 goes first.
    pub fn inactive_for(active: Option<SideLabel>) -> Self {
        active.map(Self::complement).unwrap_or(Self::One)
    }
}

impl fmt::Display for SideLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Lifecycle phase of the side a transition is walking forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SidePhase {
    Empty,
    Materializing,
    Building,
    Built,
    /// Launched but not yet receiving traffic.
    Running,
    Retiring,
}

impl fmt::Display for SidePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Materializing => "materializing",
            Self::Building => "building",
            Self::Built => "built",
            Self::Running => "running",
            Self::Retiring => "retiring",
        };
        write!(f, "{}", name)
    }
}

/// The side currently pointed at by the redirect table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSide {
    pub label: SideLabel,
    pub revision: Revision,
    pub deployed_at: DateTime<Utc>,
}

/// The side being brought up by an in-flight transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSide {
    pub label: SideLabel,
    pub revision: Revision,
    pub phase: SidePhase,
}

impl CandidateSide {
    /// Same candidate, moved on to `phase`.
    pub(crate) fn advance(&self, phase: SidePhase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}

/// Process-wide deployment state.
///
/// Directories and ports are not stored here: they are derived from the side
/// label by the `SideLayout`, so they can never disagree with the label.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeploymentState {
    /// Nothing has been deployed yet.
    #[default]
    Cold,

    /// One side is live; nothing else is happening.
    Serving { active: ActiveSide },

    /// A candidate is being prepared while `active` (if any) keeps serving.
    Transitioning {
        active: Option<ActiveSide>,
        candidate: CandidateSide,
    },

    /// Traffic has moved to `active`; the previous side is being torn down.
    Retiring {
        active: ActiveSide,
        retiring: SideLabel,
    },
}

impl DeploymentState {
    /// The side receiving traffic, if any.
    pub fn active(&self) -> Option<&ActiveSide> {
        match self {
            Self::Cold => None,
            Self::Serving { active } | Self::Retiring { active, .. } => Some(active),
            Self::Transitioning { active, .. } => active.as_ref(),
        }
    }

    pub fn active_label(&self) -> Option<SideLabel> {
        self.active().map(|a| a.label)
    }

    /// Revision of the live side, if any.
    pub fn last_revision(&self) -> Option<&Revision> {
        self.active().map(|a| &a.revision)
    }

    pub fn candidate(&self) -> Option<&CandidateSide> {
        match self {
            Self::Transitioning { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Cold | Self::Serving { .. })
    }

    /// Collapse an in-flight state back to its authoritative rest state.
    ///
    /// Used when a transition was interrupted before it could finish: the
    /// candidate never went live, so the active side is still authoritative.
    pub fn settled(self) -> Self {
        match self {
            Self::Transitioning {
                active: Some(active),
                ..
            }
            | Self::Retiring { active, .. } => Self::Serving { active },
            Self::Transitioning { active: None, .. } => Self::Cold,
            settled => settled,
        }
    }

    /// Short name for logs and status output.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Cold => "Cold",
            Self::Serving { .. } => "Serving",
            Self::Transitioning { .. } => "Transitioning",
            Self::Retiring { .. } => "Retiring",
        }
    }
}
