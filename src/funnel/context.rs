// src/funnel/context.rs
//! Per-run state shared by all workers.
//!
//! One `RunContext` per run, injected behind an `Arc`. Nothing here is
//! process-global, so independent runs (and tests) never see each other's
//! counters. All updates are single atomic operations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

use crate::config::FunnelConfig;

use super::state::{Outcome, Stage};

#[derive(Debug, Default)]
pub struct RunContext {
    max_screen_calls: Option<u64>,
    max_deep_calls: Option<u64>,

    screen_calls: AtomicU64,
    deep_calls: AtomicU64,
    retries: AtomicU64,

    classified: AtomicU64,
    rejected_by_filter: AtomicU64,
    rejected_by_screen: AtomicU64,
    failed: AtomicU64,
    deferred: AtomicU64,

    ceiling_reached: AtomicBool,
    cancelled: AtomicBool,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub classified: u64,
    pub rejected_by_filter: u64,
    pub rejected_by_screen: u64,
    pub failed: u64,
    pub deferred: u64,
    pub screen_calls: u64,
    pub deep_calls: u64,
    pub retries: u64,
}

impl RunCounts {
    /// Records that reached a terminal state.
    pub fn total(&self) -> u64 {
        self.classified + self.rejected_by_filter + self.rejected_by_screen + self.failed + self.deferred
    }
}

impl RunContext {
    pub fn new(cfg: &FunnelConfig) -> Self {
        Self::with_ceilings(cfg.max_screen_calls, cfg.max_deep_calls)
    }

    pub fn with_ceilings(max_screen_calls: Option<u64>, max_deep_calls: Option<u64>) -> Self {
        Self {
            max_screen_calls,
            max_deep_calls,
            ..Self::default()
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Reserve one model invocation for `stage`. Returns false once the
    /// stage's ceiling is spent; the counter never exceeds the ceiling.
    pub fn try_reserve(&self, stage: Stage) -> bool {
        let (counter, max) = match stage {
            Stage::Screening => (&self.screen_calls, self.max_screen_calls),
            Stage::Deep => (&self.deep_calls, self.max_deep_calls),
            // no model cost
            Stage::Persist | Stage::Executor => return true,
        };
        let reserved = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match max {
                Some(m) if n >= m => None,
                _ => Some(n + 1),
            })
            .is_ok();
        if !reserved {
            self.ceiling_reached.store(true, Ordering::SeqCst);
        }
        reserved
    }

    /// True once any stage ceiling refused a reservation or is fully spent.
    pub fn ceiling_reached(&self) -> bool {
        if self.ceiling_reached.load(Ordering::SeqCst) {
            return true;
        }
        let spent = |c: &AtomicU64, max: Option<u64>| max.is_some_and(|m| c.load(Ordering::SeqCst) >= m);
        spent(&self.screen_calls, self.max_screen_calls) || spent(&self.deep_calls, self.max_deep_calls)
    }

    /// Stop dispatching new records. In-flight records finish normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checked by each worker before it pulls the next record.
    pub fn should_dispatch(&self) -> bool {
        !self.is_cancelled() && !self.ceiling_reached()
    }

    pub(crate) fn note_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: &Outcome) {
        let c = match outcome {
            Outcome::Classified => &self.classified,
            Outcome::RejectedByFilter { .. } => &self.rejected_by_filter,
            Outcome::RejectedByScreen { .. } => &self.rejected_by_screen,
            Outcome::Failed { .. } => &self.failed,
            Outcome::Deferred { .. } => &self.deferred,
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunCounts {
        RunCounts {
            classified: self.classified.load(Ordering::SeqCst),
            rejected_by_filter: self.rejected_by_filter.load(Ordering::SeqCst),
            rejected_by_screen: self.rejected_by_screen.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            deferred: self.deferred.load(Ordering::SeqCst),
            screen_calls: self.screen_calls.load(Ordering::SeqCst),
            deep_calls: self.deep_calls.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reservations_stop_at_ceiling() {
        let ctx = RunContext::with_ceilings(Some(2), None);
        assert!(ctx.try_reserve(Stage::Screening));
        assert!(!ctx.ceiling_reached());
        assert!(ctx.try_reserve(Stage::Screening));
        assert!(ctx.ceiling_reached());
        assert!(!ctx.try_reserve(Stage::Screening));
        assert!(ctx.try_reserve(Stage::Deep));
        assert_eq!(ctx.snapshot().screen_calls, 2);
        assert!(!ctx.should_dispatch());
    }

    #[test]
    fn concurrent_reservations_never_overshoot() {
        let ctx = Arc::new(RunContext::with_ceilings(None, Some(100)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || (0..50).filter(|_| ctx.try_reserve(Stage::Deep)).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 100);
        assert_eq!(ctx.snapshot().deep_calls, 100);
    }

    #[test]
    fn cancel_blocks_dispatch() {
        let ctx = RunContext::unbounded();
        assert!(ctx.should_dispatch());
        ctx.cancel();
        assert!(!ctx.should_dispatch());
        assert!(!ctx.ceiling_reached());
    }
}
