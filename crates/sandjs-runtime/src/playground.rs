//! Single-flight run ownership for one playground instance.
//!
//! At most one guest execution may be live per instance: starting a new run
//! cancels the previous run's signal, then waits for its session to be
//! fully disposed before opening the next one.

use parking_lot::Mutex;

use crate::cancel::CancelSignal;
use crate::error::InfraError;
use crate::session::{self, ExecutionResult, RunOptions};
use crate::source::SourceDir;

/// Serializes runs and cancels the superseded one.
#[derive(Default)]
pub struct Playground {
    gate: tokio::sync::Mutex<()>,
    active: Mutex<Option<CancelSignal>>,
}

impl Playground {
    /// A playground with no run in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any in-flight run, wait for its session to wind down, then
    /// execute `dir` as a fresh run.
    pub async fn run(
        &self,
        dir: &SourceDir,
        opts: RunOptions,
    ) -> Result<ExecutionResult, InfraError> {
        if let Some(previous) = self.active.lock().replace(opts.cancel.clone()) {
            previous.cancel();
        }
        let _exclusive = self.gate.lock().await;
        session::run(dir, opts).await
    }
}
