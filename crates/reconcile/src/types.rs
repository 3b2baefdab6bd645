//! Apply outcomes and reports

use crate::error::ApiError;
use crate::plan::OperationKind;
use crate::resource::ResourceKey;
use serde::Serialize;

/// Outcome of a single planned operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The remote call succeeded
    Succeeded,
    /// The remote call failed
    Failed { error: ApiError },
    /// The operation was not attempted
    Skipped { reason: String },
}

impl ApplyOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcome of one operation of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    /// Index of the operation in the plan
    pub index: usize,
    pub key: ResourceKey,
    pub kind: OperationKind,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

/// Counts of apply outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ApplySummary {
    /// Total number of changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match (&result.outcome, result.kind) {
            (ApplyOutcome::Succeeded, OperationKind::Create) => self.created += 1,
            (ApplyOutcome::Succeeded, OperationKind::Update) => self.updated += 1,
            (ApplyOutcome::Succeeded, OperationKind::Delete) => self.deleted += 1,
            (ApplyOutcome::Failed { .. }, _) => self.failed += 1,
            (ApplyOutcome::Skipped { .. }, _) => self.skipped += 1,
        }
    }
}

/// Per-operation outcomes of an apply, in plan order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub results: Vec<ApplyResult>,
    /// The run was cancelled before every operation was attempted
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for result in &self.results {
            summary.add_result(result);
        }
        summary
    }

    /// Results of operations that failed
    pub fn failures(&self) -> impl Iterator<Item = &ApplyResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }

    /// Check if every operation succeeded
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.outcome.is_success())
    }
}
