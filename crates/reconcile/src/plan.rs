//! Change plans
//!
//! A [`ChangePlan`] is the ordered list of remote operations that moves the
//! deployed state to the declared state. Plans are computed by
//! [`diff::compute_plan`](crate::diff::compute_plan) and executed by
//! [`executor::apply`](crate::executor::apply).

use crate::graph::NodeId;
use crate::resource::{Fields, ResourceKey};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

const REDACTED: &str = "REDACTED";

/// Why a resource is being created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateReason {
    /// Not deployed yet
    New,
    /// Deployed instance is being deleted first
    Replacement,
}

/// Why a deployed resource is being deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    /// No longer declared
    Removed,
    /// An immutable field or the parent changed
    Replaced,
    /// An ancestor is being replaced
    Cascade,
}

/// A single field change carried by an update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    /// Deployed value; `Null` when unset
    pub from: Value,
    /// Declared value; `Null` when unset
    pub to: Value,
    pub secret: bool,
}

impl FieldChange {
    /// Render as `field: from -> to`, redacting secret values
    pub fn render(&self, show_secrets: bool) -> String {
        if self.secret && !show_secrets {
            format!("{}: {REDACTED} -> {REDACTED}", self.field)
        } else {
            format!("{}: {} -> {}", self.field, self.from, self.to)
        }
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

/// Kind of a planned operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A remote operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operation {
    /// Create a declared resource
    Create {
        #[serde(skip)]
        node: NodeId,
        key: ResourceKey,
        /// Declared parent; its server id is read when the create runs
        #[serde(skip)]
        parent: Option<NodeId>,
        fields: Fields,
        reason: CreateReason,
    },
    /// Update mutable fields of a deployed resource in place
    Update {
        #[serde(skip)]
        node: NodeId,
        key: ResourceKey,
        id: String,
        changes: Vec<FieldChange>,
    },
    /// Delete a deployed resource
    Delete {
        key: ResourceKey,
        id: String,
        reason: DeleteReason,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Create { key, .. } | Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    /// Declared resource the operation acts on; `None` for deletes
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Create { node, .. } | Self::Update { node, .. } => Some(*node),
            Self::Delete { .. } => None,
        }
    }

    /// Changed fields of an update, as sent to the remote API
    pub fn changed_fields(&self) -> Fields {
        match self {
            Self::Update { changes, .. } => changes
                .iter()
                .map(|c| (c.field.clone(), c.to.clone()))
                .collect(),
            _ => Fields::new(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { key, reason, .. } => {
                write!(f, "create {key}")?;
                if *reason == CreateReason::Replacement {
                    f.write_str(" (replacement)")?;
                }
                Ok(())
            }
            Self::Update { key, changes, .. } => {
                let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
                write!(f, "update {key} ({})", fields.join(", "))
            }
            Self::Delete { key, reason, .. } => {
                write!(f, "delete {key}")?;
                match reason {
                    DeleteReason::Removed => Ok(()),
                    DeleteReason::Replaced => f.write_str(" (replaced)"),
                    DeleteReason::Cascade => f.write_str(" (parent replaced)"),
                }
            }
        }
    }
}

/// An operation plus the plan indices that must succeed before it runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedOperation {
    pub operation: Operation,
    pub depends_on: Vec<usize>,
}

/// Counts of planned operations by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete",
            self.creates, self.updates, self.deletes
        )
    }
}

/// Ordered list of operations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangePlan {
    operations: Vec<PlannedOperation>,
}

impl ChangePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation and return its index
    pub(crate) fn push(&mut self, operation: Operation, depends_on: Vec<usize>) -> usize {
        debug_assert!(depends_on.iter().all(|&d| d < self.operations.len()));
        self.operations.push(PlannedOperation {
            operation,
            depends_on,
        });
        self.operations.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&PlannedOperation> {
        self.operations.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlannedOperation> {
        self.operations.iter()
    }

    /// Operations without their dependency lists, in plan order
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().map(|p| &p.operation)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in self.operations() {
            match op.kind() {
                OperationKind::Create => summary.creates += 1,
                OperationKind::Update => summary.updates += 1,
                OperationKind::Delete => summary.deletes += 1,
            }
        }
        summary
    }
}

impl<'a> IntoIterator for &'a ChangePlan {
    type Item = &'a PlannedOperation;
    type IntoIter = std::slice::Iter<'a, PlannedOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
