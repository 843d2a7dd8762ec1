//! Pure state transition function.
//!
//! The transition function is the core of the state machine. It takes the
//! current state and an event, and returns the new state and a list of effects.
//! This function has NO side effects - it is pure and deterministic.
//!
//! A transition walks the candidate side forward
//! (`Materializing -> Building -> Built -> Running`) while the active side
//! keeps serving. Traffic only moves once the candidate is running, and the
//! previous side is only retired after traffic has moved.

use super::effect::{Effect, LogLevel};
use super::event::{Event, TransitionStage};
use super::state::{ActiveSide, CandidateSide, DeploymentState, SideLabel, SidePhase};

/// Result of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    /// The new state after the transition.
    pub state: DeploymentState,
    /// Effects to execute.
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: DeploymentState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }

    pub fn no_change(state: DeploymentState) -> Self {
        Self {
            state,
            effects: vec![],
        }
    }
}

fn log(level: LogLevel, message: impl Into<String>) -> Effect {
    Effect::Log {
        level,
        message: message.into(),
    }
}

/// Move the candidate to `phase` and request `effect`.
fn advance(
    active: &Option<ActiveSide>,
    candidate: &CandidateSide,
    phase: SidePhase,
    effect: Effect,
) -> TransitionResult {
    TransitionResult::new(
        DeploymentState::Transitioning {
            active: active.clone(),
            candidate: candidate.advance(phase),
        },
        vec![effect],
    )
}

/// Pure state transition function.
///
/// Given the current state and an event, returns the new state and effects to execute.
/// This function has NO side effects - all effects are returned as data.
pub fn transition(state: DeploymentState, event: Event) -> TransitionResult {
    match (&state, event) {
        // =====================================================================
        // Starting a transition
        // =====================================================================

        // Nothing in flight -> start building into the inactive side
        (DeploymentState::Cold | DeploymentState::Serving { .. }, Event::DeployRequested { revision }) => {
            let active = state.active().cloned();
            let side = SideLabel::inactive_for(active.as_ref().map(|a| a.label));
            let message = match &active {
                Some(current) => format!(
                    "Deploying {} to side {} (side {} serving {})",
                    revision.short(),
                    side,
                    current.label,
                    current.revision.short()
                ),
                None => format!("Deploying {} to side {} (cold start)", revision.short(), side),
            };

            TransitionResult::new(
                DeploymentState::Transitioning {
                    active,
                    candidate: CandidateSide {
                        label: side,
                        revision,
                        phase: SidePhase::Materializing,
                    },
                },
                vec![log(LogLevel::Info, message), Effect::PrepareDirectory { side }],
            )
        }

        // Transitions are serialized by the deployer, so this only happens if
        // a caller bypasses it. Never interleave two candidates.
        (_, Event::DeployRequested { revision }) => TransitionResult::new(
            state.clone(),
            vec![log(
                LogLevel::Warn,
                format!(
                    "Ignoring deploy of {} while in state {}",
                    revision.short(),
                    state.state_name()
                ),
            )],
        ),

        // =====================================================================
        // Candidate progress
        // =====================================================================
        (
            DeploymentState::Transitioning { active, candidate },
            Event::DirectoryPrepared { side },
        ) if candidate.label == side && candidate.phase == SidePhase::Materializing => advance(
            active,
            candidate,
            SidePhase::Materializing,
            Effect::Materialize {
                side,
                revision: candidate.revision.clone(),
            },
        ),

        (DeploymentState::Transitioning { active, candidate }, Event::Materialized { side })
            if candidate.label == side && candidate.phase == SidePhase::Materializing =>
        {
            advance(active, candidate, SidePhase::Building, Effect::Build { side })
        }

        (DeploymentState::Transitioning { active, candidate }, Event::Built { side })
            if candidate.label == side && candidate.phase == SidePhase::Building =>
        {
            advance(active, candidate, SidePhase::Built, Effect::Launch { side })
        }

        (DeploymentState::Transitioning { active, candidate }, Event::Launched { side, .. })
            if candidate.label == side && candidate.phase == SidePhase::Built =>
        {
            advance(
                active,
                candidate,
                SidePhase::Running,
                Effect::AwaitReadiness { side },
            )
        }

        (DeploymentState::Transitioning { active, candidate }, Event::Ready { side })
            if candidate.label == side && candidate.phase == SidePhase::Running =>
        {
            advance(active, candidate, SidePhase::Running, Effect::SwapTarget { side })
        }

        // A stage failed -> the active side stays authoritative, untouched
        (
            DeploymentState::Transitioning { active, candidate },
            Event::StageFailed { side, stage, error },
        ) if candidate.label == side => {
            let restored = match active {
                Some(active) => DeploymentState::Serving {
                    active: active.clone(),
                },
                None => DeploymentState::Cold,
            };

            let mut effects = Vec::new();
            // Only a launched candidate has a process to clean up
            if stage == TransitionStage::Readiness {
                effects.push(Effect::DiscardCandidate { side });
            }
            effects.push(log(
                LogLevel::Error,
                format!(
                    "Transition to {} on side {} abandoned at {} stage: {}",
                    candidate.revision.short(),
                    side,
                    stage,
                    error
                ),
            ));

            TransitionResult::new(restored, effects)
        }

        // =====================================================================
        // Cutover
        // =====================================================================

        // Traffic moved -> candidate is now active; retire the old side
        (
            DeploymentState::Transitioning { active, candidate },
            Event::TargetSwapped { side, swapped_at },
        ) if candidate.label == side && candidate.phase == SidePhase::Running => {
            let new_active = ActiveSide {
                label: side,
                revision: candidate.revision.clone(),
                deployed_at: swapped_at,
            };
            let message = format!(
                "Traffic now served by side {} at {}",
                side,
                candidate.revision.short()
            );

            match active {
                Some(previous) => TransitionResult::new(
                    DeploymentState::Retiring {
                        active: new_active,
                        retiring: previous.label,
                    },
                    vec![
                        log(LogLevel::Info, message),
                        Effect::Retire {
                            side: previous.label,
                        },
                    ],
                ),
                None => TransitionResult::new(
                    DeploymentState::Serving { active: new_active },
                    vec![log(LogLevel::Info, message)],
                ),
            }
        }

        (DeploymentState::Retiring { active, retiring }, Event::Retired { side })
            if *retiring == side =>
        {
            TransitionResult::new(
                DeploymentState::Serving {
                    active: active.clone(),
                },
                vec![log(
                    LogLevel::Info,
                    format!(
                        "Side {} retired; deployment of {} complete",
                        side,
                        active.revision.short()
                    ),
                )],
            )
        }

        // The new side is already live; an undead old process is a leak, not
        // a reason to roll back.
        (DeploymentState::Retiring { active, retiring }, Event::RetireFailed { side, error })
            if *retiring == side =>
        {
            TransitionResult::new(
                DeploymentState::Serving {
                    active: active.clone(),
                },
                vec![log(
                    LogLevel::Warn,
                    format!("Failed to retire side {}: {}", side, error),
                )],
            )
        }

        // =====================================================================
        // Anything else is stale or out of order
        // =====================================================================
        (_, event) => TransitionResult::new(
            state.clone(),
            vec![log(
                LogLevel::Warn,
                format!(
                    "Ignoring event {} in state {}",
                    event.log_summary(),
                    state.state_name()
                ),
            )],
        ),
    }
}
