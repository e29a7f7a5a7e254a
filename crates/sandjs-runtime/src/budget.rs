//! Cooperative CPU/time budget enforced from the guest interrupt handler.
//!
//! QuickJS invokes the interrupt callback at a roughly fixed instruction
//! quantum (on the order of a few thousand instructions). The budget counts
//! those checkpoints and aborts the run when the checkpoint cap, the
//! wall-clock deadline, or the cancellation signal trips. An abort surfaces
//! to the caller as a guest-level exception from whatever call was in
//! flight, never as a host panic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::cancel::CancelSignal;

/// Hard resource ceilings for one run. All knobs are caller-overridable;
/// the defaults match the reference playground.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Guest heap ceiling, enforced by the engine.
    pub memory_bytes: usize,
    /// Guest stack ceiling, enforced by the engine.
    pub stack_bytes: usize,
    /// Maximum number of interrupt checkpoints before aborting. The
    /// instructions-per-checkpoint quantum is engine specific, so this cap
    /// is approximate by design.
    pub cycle_cap: u64,
    /// Wall-clock deadline for the whole run.
    pub deadline: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_bytes: 10 * 1024 * 1024,
            stack_bytes: 1024 * 1024,
            cycle_cap: 1024,
            deadline: Duration::from_millis(2500),
        }
    }
}

/// Shared budget state, mutated only from the interrupt callback.
#[derive(Debug)]
pub struct Budget {
    interrupts: AtomicU64,
    start: Instant,
    cycle_cap: u64,
    deadline: Duration,
    cancel: CancelSignal,
}

impl Budget {
    /// Start the clock for one run.
    pub fn new(limits: &Limits, cancel: CancelSignal) -> Self {
        Self {
            interrupts: AtomicU64::new(0),
            start: Instant::now(),
            cycle_cap: limits.cycle_cap,
            deadline: limits.deadline,
            cancel,
        }
    }

    /// Interrupt checkpoint: count it and decide abort (`true`) or
    /// continue (`false`).
    pub fn on_interrupt(&self) -> bool {
        let cycles = self.interrupts.fetch_add(1, Ordering::Relaxed) + 1;
        if cycles > self.cycle_cap {
            log::error!("interrupt cycles exceeded (cycles: {cycles})");
            return true;
        }
        if self.start.elapsed() > self.deadline {
            log::error!("deadline exceeded (cycles: {cycles})");
            return true;
        }
        if self.cancel.is_cancelled() {
            log::error!("run cancelled (cycles: {cycles})");
            return true;
        }
        false
    }

    /// Checkpoints observed so far.
    pub fn cycles(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }

    /// Wall-clock deadline measured from the run start.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Time spent since the run started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(cycle_cap: u64, deadline: Duration) -> Limits {
        Limits {
            cycle_cap,
            deadline,
            ..Limits::default()
        }
    }

    #[test]
    fn trips_on_cycle_cap() {
        let budget = Budget::new(
            &limits(3, Duration::from_secs(60)),
            CancelSignal::new(),
        );
        assert!(!budget.on_interrupt());
        assert!(!budget.on_interrupt());
        assert!(!budget.on_interrupt());
        assert!(budget.on_interrupt());
        assert_eq!(budget.cycles(), 4);
    }

    #[test]
    fn trips_on_deadline() {
        let budget = Budget::new(
            &limits(u64::MAX, Duration::from_millis(0)),
            CancelSignal::new(),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(budget.on_interrupt());
    }

    #[test]
    fn trips_on_cancellation() {
        let cancel = CancelSignal::new();
        let budget = Budget::new(&limits(u64::MAX, Duration::from_secs(60)), cancel.clone());
        assert!(!budget.on_interrupt());
        cancel.cancel();
        assert!(budget.on_interrupt());
    }
}
