#![forbid(unsafe_code)]

pub mod accumulator;
pub mod csv;
pub mod drain;
pub mod reconcile;
pub mod session;
pub mod sink;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod test_support;

pub use accumulator::Accumulator;
pub use drain::DrainStats;
pub use session::{AccessPolicy, Session, SessionConfig, SessionDeps, SessionState, StartError, TickOutcome};
pub use sink::{DirSink, MemorySink, SnapshotSink};
pub use snapshot::SnapshotScheduler;
