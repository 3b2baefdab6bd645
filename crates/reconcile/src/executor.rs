//! Applier - executes a change plan against the remote API
//!
//! Operations run strictly in plan order, one at a time. A failure never
//! aborts the run: it is recorded and every operation that depends on the
//! failed one is skipped.

use crate::context::{CancellationToken, ProgressCallback};
use crate::graph::{NodeId, ResourceGraph};
use crate::plan::{ChangePlan, Operation, PlannedOperation};
use crate::resource::ResourceStatus;
use crate::state::RemoteApi;
use crate::types::{ApplyOutcome, ApplyReport, ApplyResult};

/// Execute a plan and report the outcome of every operation
///
/// Successful creates write the server id onto the graph before the next
/// operation runs, so child creates can read their parent's id.
///
/// # Arguments
/// * `plan` - Plan computed for this graph
/// * `graph` - Declared graph the plan was computed from
/// * `api` - Remote system to apply against
/// * `progress` - Progress callback
/// * `cancel` - Checked before every operation
pub fn apply<P>(
    plan: &ChangePlan,
    graph: &mut ResourceGraph,
    api: &dyn RemoteApi,
    progress: &mut P,
    cancel: &CancellationToken,
) -> ApplyReport
where
    P: ProgressCallback + ?Sized,
{
    let mut report = ApplyReport::default();
    progress.on_plan_start(plan.len());

    for (index, planned) in plan.iter().enumerate() {
        let operation = &planned.operation;

        let outcome = if cancel.is_cancelled() {
            if !report.cancelled {
                log::warn!("Run cancelled; skipping the remaining operations");
            }
            report.cancelled = true;
            ApplyOutcome::skipped("run cancelled")
        } else if let Some(reason) = unmet_dependency(planned, &report) {
            log::info!("Skipping {operation}: {reason}");
            ApplyOutcome::skipped(reason)
        } else {
            progress.on_operation_start(index, operation);
            if let Some(node) = operation.node() {
                graph.set_status(node, ResourceStatus::Applying);
            }
            run_operation(operation, graph, api)
        };

        if let Some(node) = operation.node() {
            let status = match &outcome {
                ApplyOutcome::Succeeded => ResourceStatus::Applied,
                ApplyOutcome::Failed { .. } => ResourceStatus::Failed,
                ApplyOutcome::Skipped { .. } => ResourceStatus::Declared,
            };
            graph.set_status(node, status);
        }

        let result = ApplyResult {
            index,
            key: operation.key().clone(),
            kind: operation.kind(),
            outcome,
        };
        progress.on_operation_complete(&result);
        report.results.push(result);
    }

    progress.on_plan_complete(&report);
    report
}

/// First dependency that did not succeed, as a skip reason
fn unmet_dependency(planned: &PlannedOperation, report: &ApplyReport) -> Option<String> {
    planned.depends_on.iter().find_map(|&dep| {
        let result = report.results.get(dep)?;
        (!result.outcome.is_success())
            .then(|| format!("depends on {} {} which did not succeed", result.kind, result.key))
    })
}

fn run_operation(
    operation: &Operation,
    graph: &mut ResourceGraph,
    api: &dyn RemoteApi,
) -> ApplyOutcome {
    let key = operation.key();

    let result = match operation {
        Operation::Create {
            node,
            parent,
            fields,
            ..
        } => {
            let parent_id = match parent_id(graph, *parent) {
                Ok(id) => id,
                Err(outcome) => return outcome,
            };
            api.create(&key.type_name, &key.name, parent_id.as_deref(), fields)
                .map(|id| {
                    log::debug!("Created {key} with id {id}");
                    graph.set_id(*node, &id);
                })
        }
        Operation::Update { id, .. } => {
            api.update(&key.type_name, id, &operation.changed_fields())
        }
        Operation::Delete { id, .. } => match api.delete(&key.type_name, id) {
            Err(e) if e.is_not_found() => {
                log::debug!("{key} was already gone");
                Ok(())
            }
            other => other,
        },
    };

    match result {
        Ok(()) => {
            log::info!("{operation}: ok");
            ApplyOutcome::Succeeded
        }
        Err(error) => {
            log::warn!("{operation}: {error}");
            ApplyOutcome::Failed { error }
        }
    }
}

/// Server id of the parent a create hangs under
fn parent_id(
    graph: &ResourceGraph,
    parent: Option<NodeId>,
) -> Result<Option<String>, ApplyOutcome> {
    let Some(parent) = parent else {
        return Ok(None);
    };
    match graph.get(parent).and_then(|p| p.id()) {
        Some(id) => Ok(Some(id.to_string())),
        None => Err(ApplyOutcome::skipped("parent has no server id")),
    }
}
