//! Run context and provider traits
//!
//! These traits let callers plug progress reporting and confirmation into a
//! run without the engine depending on any terminal library.

use crate::plan::{ChangePlan, Operation};
use crate::types::{ApplyReport, ApplyResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for apply operations
pub trait ProgressCallback {
    /// Called before the first operation runs
    fn on_plan_start(&mut self, count: usize);

    /// Called when an operation is about to run
    fn on_operation_start(&mut self, index: usize, operation: &Operation);

    /// Called when an operation has run or been skipped
    fn on_operation_complete(&mut self, result: &ApplyResult);

    /// Called after the last operation
    fn on_plan_complete(&mut self, report: &ApplyReport);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback {
    /// Ask whether `plan` should be applied
    fn confirm(&mut self, plan: &ChangePlan) -> bool;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan_start(&mut self, _count: usize) {}
    fn on_operation_start(&mut self, _index: usize, _operation: &Operation) {}
    fn on_operation_complete(&mut self, _result: &ApplyResult) {}
    fn on_plan_complete(&mut self, _report: &ApplyReport) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _plan: &ChangePlan) -> bool {
        true
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _plan: &ChangePlan) -> bool {
        false
    }
}

/// Run-level cancellation flag
///
/// Clones share the flag. Cancelling lets the in-flight remote call finish
/// and skips everything after it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
