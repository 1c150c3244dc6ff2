//! fleetexec-core: Multi-host coordination
//!
//! Runs a unit of work once per host under a concurrency strategy and
//! aggregates the outcomes. Progress is published as [`RunEvent`]s.

pub mod coordinator;
pub mod error;
pub mod event;
pub mod state;
pub mod strategy;
pub mod work;

pub use coordinator::{Coordinator, HostOutcome, RunReport};
pub use error::{AggregateFailure, CoreError, HostFailure};
pub use event::RunEvent;
pub use state::{RunState, UnitState};
pub use strategy::{FailureMode, Policy, Strategy};
pub use work::{BackendFactory, BoxFuture, FnWork, Work, work_fn};
