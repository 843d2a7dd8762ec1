//! Effect interpreter that executes effects against the real world.
//!
//! The interpreter is the boundary between the pure state machine and the
//! impure world of I/O. It takes effects (descriptions of what to do) and
//! executes them, returning result events. It holds no state of its own: process
//! handles live in `SideProcesses`, which the deployer keeps behind its lock.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::effect::{Effect, LogLevel};
use super::event::{Event, TransitionStage};
use super::state::SideLabel;
use crate::materializer::Materializer;
use crate::redirect::{RedirectTable, RedirectTarget};
use crate::supervisor::{ProcessHandle, ProcessSupervisor};
use crate::workspace::{self, SideLayout, SIDE_HOST};

/// Context needed by the interpreter to execute effects.
pub struct InterpreterContext {
    pub materializer: Arc<dyn Materializer>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub redirect: Arc<RedirectTable>,
    pub layout: SideLayout,
    /// Bound on the pre-swap readiness probe. `None` swaps immediately.
    pub readiness_timeout: Option<Duration>,
}

/// Process handle per side. Each handle belongs to exactly one side and is
/// taken out when that side is retired or discarded.
#[derive(Debug, Default)]
pub struct SideProcesses {
    one: Option<ProcessHandle>,
    two: Option<ProcessHandle>,
}

impl SideProcesses {
    fn slot(&mut self, side: SideLabel) -> &mut Option<ProcessHandle> {
        match side {
            SideLabel::One => &mut self.one,
            SideLabel::Two => &mut self.two,
        }
    }

    /// Store the handle for `side`, returning any handle it displaced.
    pub fn insert(&mut self, side: SideLabel, handle: ProcessHandle) -> Option<ProcessHandle> {
        self.slot(side).replace(handle)
    }

    pub fn take(&mut self, side: SideLabel) -> Option<ProcessHandle> {
        self.slot(side).take()
    }
}

/// Result of executing an effect.
#[derive(Debug)]
pub enum EffectResult {
    /// Effect completed, produced result events.
    Ok(Vec<Event>),
    /// Effect failed with an error.
    Err(String),
}

impl EffectResult {
    pub fn single(event: Event) -> Self {
        Self::Ok(vec![event])
    }

    pub fn none() -> Self {
        Self::Ok(vec![])
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self::Err(msg.into())
    }
}

fn stage_failed(side: SideLabel, stage: TransitionStage, error: anyhow::Error) -> EffectResult {
    EffectResult::single(Event::StageFailed {
        side,
        stage,
        error: format!("{:#}", error),
    })
}

/// Execute a list of effects and collect result events.
///
/// Effects are executed sequentially. If an effect fails, execution continues
/// with remaining effects, and the error is logged.
pub async fn execute_effects(
    ctx: &InterpreterContext,
    processes: &mut SideProcesses,
    effects: Vec<Effect>,
) -> Vec<Event> {
    let mut result_events = Vec::new();

    for effect in effects {
        match execute_effect(ctx, processes, effect).await {
            EffectResult::Ok(events) => result_events.extend(events),
            EffectResult::Err(err) => {
                error!("Effect execution failed: {}", err);
            }
        }
    }

    result_events
}

/// Execute a single effect.
async fn execute_effect(
    ctx: &InterpreterContext,
    processes: &mut SideProcesses,
    effect: Effect,
) -> EffectResult {
    match effect {
        Effect::PrepareDirectory { side } => execute_prepare_directory(ctx, side).await,

        Effect::Materialize { side, revision } => {
            let dir = ctx.layout.dir(side);
            match ctx.materializer.materialize(&revision, &dir).await {
                Ok(()) => EffectResult::single(Event::Materialized { side }),
                Err(e) => stage_failed(side, TransitionStage::Materialize, e),
            }
        }

        Effect::Build { side } => {
            let dir = ctx.layout.dir(side);
            match ctx.materializer.build(&dir).await {
                Ok(()) => EffectResult::single(Event::Built { side }),
                Err(e) => stage_failed(side, TransitionStage::Build, e),
            }
        }

        Effect::Launch { side } => execute_launch(ctx, processes, side).await,

        Effect::AwaitReadiness { side } => {
            let Some(timeout) = ctx.readiness_timeout else {
                return EffectResult::single(Event::Ready { side });
            };
            let port = ctx.layout.port(side);
            match ctx.supervisor.wait_ready(port, timeout).await {
                Ok(()) => EffectResult::single(Event::Ready { side }),
                Err(e) => stage_failed(side, TransitionStage::Readiness, e),
            }
        }

        Effect::DiscardCandidate { side } => {
            if let Err(e) = ctx.supervisor.terminate(processes.take(side)).await {
                return EffectResult::err(format!(
                    "Failed to stop abandoned candidate on side {}: {:#}",
                    side, e
                ));
            }
            EffectResult::none()
        }

        Effect::SwapTarget { side } => {
            let target = RedirectTarget::new(side, SIDE_HOST, ctx.layout.port(side));
            let previous = ctx.redirect.replace(target.clone());
            match previous {
                Some(previous) => info!("Redirect switched from {} to {}", previous, target),
                None => info!("Redirect now points at {}", target),
            }
            EffectResult::single(Event::TargetSwapped {
                side,
                swapped_at: Utc::now(),
            })
        }

        Effect::Retire { side } => execute_retire(ctx, processes, side).await,

        Effect::Log { level, message } => {
            match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            }
            EffectResult::none()
        }
    }
}

async fn execute_prepare_directory(ctx: &InterpreterContext, side: SideLabel) -> EffectResult {
    let dir = ctx.layout.dir(side);
    info!("Preparing side {} directory {}", side, dir.display());

    match workspace::prepare_directory(&dir).await {
        Ok(()) => EffectResult::single(Event::DirectoryPrepared { side }),
        Err(e) => stage_failed(side, TransitionStage::Prepare, e),
    }
}

async fn execute_launch(
    ctx: &InterpreterContext,
    processes: &mut SideProcesses,
    side: SideLabel,
) -> EffectResult {
    let dir = ctx.layout.dir(side);
    let port = ctx.layout.port(side);

    let handle = match ctx.supervisor.launch(&dir, port).await {
        Ok(handle) => handle,
        Err(e) => return stage_failed(side, TransitionStage::Launch, e),
    };
    let pid = handle.pid();
    info!("Side {} launched as process {} on port {}", side, pid, port);

    // Normally empty: the side was retired or discarded last cycle
    if let Some(stale) = processes.insert(side, handle) {
        warn!(
            "Side {} still had process {} recorded; stopping it",
            side,
            stale.pid()
        );
        if let Err(e) = ctx.supervisor.terminate(Some(stale)).await {
            warn!("Failed to stop stale process on side {}: {:#}", side, e);
        }
    }

    EffectResult::single(Event::Launched { side, pid })
}

/// Kill the retired side's process, then remove its directory. Both are
/// attempted even if the first fails.
async fn execute_retire(
    ctx: &InterpreterContext,
    processes: &mut SideProcesses,
    side: SideLabel,
) -> EffectResult {
    let mut errors = Vec::new();

    if let Err(e) = ctx.supervisor.terminate(processes.take(side)).await {
        errors.push(format!("terminate: {:#}", e));
    }

    let dir = ctx.layout.dir(side);
    if let Err(e) = workspace::remove_directory(&dir).await {
        errors.push(format!("cleanup: {:#}", e));
    }

    if errors.is_empty() {
        EffectResult::single(Event::Retired { side })
    } else {
        EffectResult::single(Event::RetireFailed {
            side,
            error: errors.join("; "),
        })
    }
}
