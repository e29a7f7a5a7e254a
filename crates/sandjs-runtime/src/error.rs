//! Runtime error types.

/// Host-infrastructure failures, the only errors that escape
/// [`run`](crate::run) as a hard failure.
///
/// Everything the guest does wrong (syntax errors, thrown exceptions,
/// resource-limit aborts, resolver misses) is absorbed into a normal
/// [`ExecutionResult`](crate::ExecutionResult) with no value, observable
/// through the run log.
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    /// Engine instantiation or another host-side engine fault outside the
    /// guest call protocol.
    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    /// The cancellation signal was already raised before the engine was
    /// opened.
    #[error("run cancelled before start")]
    Cancelled,
}
