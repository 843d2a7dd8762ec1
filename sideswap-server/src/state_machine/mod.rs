//! Explicit state machine for blue-green side switching.
//!
//! This module implements the side-switching lifecycle as a pure functional
//! state machine. The design separates:
//! - **State**: Which side is live and what the candidate side is doing (`DeploymentState`)
//! - **Events**: What happened (`Event`)
//! - **Effects**: What to do (`Effect`)
//! - **Transition**: Pure function `(State, Event) -> (State, Vec<Effect>)`
//!
//! The interpreter executes effects against the filesystem, the materializer,
//! the process supervisor and the redirect table, and returns result events.
//! The deployer owns the lock that serializes transitions and drives the loop.

pub mod deployer;
pub mod effect;
pub mod event;
pub mod interpreter;
pub mod state;
pub mod transition;

pub use deployer::*;
pub use effect::*;
pub use event::*;
pub use interpreter::InterpreterContext;
pub use state::*;
pub use transition::*;
