//! Progress events broadcast during a run

use std::sync::Arc;

use fleetexec_exec::Host;

use crate::state::{RunState, UnitState};

/// Emitted on the coordinator's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    RunStateChanged {
        from: RunState,
        to: RunState,
    },
    UnitStateChanged {
        /// Position of the host in the run's host list
        index: usize,
        host: Arc<Host>,
        from: UnitState,
        to: UnitState,
    },
    /// A group barrier was reached (grouped strategy only)
    GroupFinished {
        group: usize,
        hosts: usize,
        failed: usize,
    },
}
