//! Effects (side effects as data).
//!
//! Effects describe what should happen as a result of a state transition.
//! They are pure data - the interpreter executes them. Directories and ports
//! are resolved from the side label by the interpreter's layout.

use sideswap_core::Revision;

use super::state::SideLabel;

/// All effects that can be produced by state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    // =========================================================================
    // Candidate Effects
    // =========================================================================
    /// Create the side directory, wiping whatever a previous cycle left there.
    PrepareDirectory { side: SideLabel },

    /// Materialize `revision` into the side directory.
    Materialize { side: SideLabel, revision: Revision },

    /// Build the artifact inside the side directory.
    Build { side: SideLabel },

    /// Start the artifact bound to the side's port.
    Launch { side: SideLabel },

    /// Wait (bounded) until the side's port accepts connections.
    AwaitReadiness { side: SideLabel },

    /// Kill a launched candidate that will never receive traffic.
    DiscardCandidate { side: SideLabel },

    // =========================================================================
    // Cutover Effects
    // =========================================================================
    /// Atomically point the redirect table at the side's port.
    SwapTarget { side: SideLabel },

    /// Kill the side's process and remove its directory.
    Retire { side: SideLabel },

    // =========================================================================
    // Logging Effects
    // =========================================================================
    Log { level: LogLevel, message: String },
}

/// Log level for logging effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
