//! sandjs runtime
//!
//! Runs untrusted scripts inside an embedded, sandboxed QuickJS
//! interpreter with hard resource ceilings, a cooperative interrupt-driven
//! CPU/time budget, and a minimal host-capability bridge (`log`, `sleep`,
//! `sha256hex`) available to guest code as the `sandbox:std` module.
//!
//! The entry point is [`run`]: supply a [`SourceDir`], a [`Logger`], a
//! [`CancelSignal`], and [`Limits`]; get back an [`ExecutionResult`] with
//! the script's JSON-serializable return value (if any), its duration, and
//! its interrupt-cycle count. Guest failures never surface as host errors:
//! they end the run with no value and leave their trace in the log.

pub mod budget;
pub mod cancel;
pub mod error;
pub mod lifetime;
pub mod logger;
pub mod playground;
pub mod resolver;
pub mod session;
pub mod source;

mod bridge;

pub use budget::{Budget, Limits};
pub use cancel::CancelSignal;
pub use error::InfraError;
pub use lifetime::LifetimeRegistry;
pub use logger::{CachedLogger, LogEntry, Logger};
pub use playground::Playground;
pub use resolver::HOST_SPECIFIER;
pub use session::{run, ExecutionResult, RunOptions, Session};
pub use source::SourceDir;
