//! Declarative resource reconciliation
//!
//! Callers declare a forest of typed resources in a [`ResourceGraph`]. A run
//! fetches what is deployed through a [`StateFetcher`], computes an ordered
//! [`ChangePlan`] of creates, updates and deletes, and applies it through a
//! [`RemoteApi`], reporting the outcome of every operation.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   fetch    ┌──────────────┐
//! │ ResourceGraph │──────────▶ │ ActualState  │
//! └───────┬───────┘            └──────┬───────┘
//!         │        compute_plan       │
//!         └────────────┬──────────────┘
//!                      ▼
//!               ┌────────────┐   apply   ┌─────────────┐
//!               │ ChangePlan │─────────▶ │ ApplyReport │
//!               └────────────┘           └─────────────┘
//! ```
//!
//! - Field mutability is declared once per type in a [`ResourceSchema`];
//!   a change to an immutable field or to the parent replaces the resource
//!   and its whole deployed subtree.
//! - Deletes run children first, creates and updates parents first.
//! - A failed operation never aborts the run; operations depending on it
//!   are skipped.
//!
//! # Example
//!
//! ```
//! use reconcile::{InMemoryRemote, ReconcileOptions, Resource, ResourceGraph};
//!
//! let mut graph = ResourceGraph::with_standard_types();
//! let alerts = graph
//!     .add_root(
//!         Resource::new("Channel", "alerts")
//!             .with_field("kind", "webhook")
//!             .with_field("webhook_url", "https://hooks.example.com"),
//!     )
//!     .unwrap();
//! graph
//!     .register_child(alerts, Resource::new("NotificationRule", "rule1"))
//!     .unwrap();
//!
//! let remote = InMemoryRemote::new(graph.registry_arc());
//! let options = ReconcileOptions::default();
//!
//! let report = reconcile::reconcile(&mut graph, &remote, &remote, &options).unwrap();
//! assert_eq!(report.summary().created, 2);
//!
//! // Nothing left to do on the second run
//! let plan = reconcile::plan(&mut graph, &remote, &options).unwrap();
//! assert!(plan.is_empty());
//! ```

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod memory;
pub mod plan;
pub mod resource;
pub mod schema;
pub mod state;
pub mod types;

pub use context::{
    AutoConfirm, AutoDecline, CancellationToken, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use error::{ApiError, Error, ErrorCategory, FetchError, Result};
pub use graph::{NodeId, ResourceGraph};
pub use memory::{InMemoryRemote, RemoteRecord, RemoteStore};
pub use plan::{
    ChangePlan, CreateReason, DeleteReason, FieldChange, Operation, OperationKind, PlanSummary,
    PlannedOperation,
};
pub use resource::{Fields, Resource, ResourceKey, ResourceStatus};
pub use schema::{FieldDescriptor, Mutability, ResourceSchema, TypeRegistry};
pub use state::{ActualState, FetchedResource, RemoteApi, StateFetcher};
pub use types::{ApplyOutcome, ApplyReport, ApplyResult, ApplySummary};

/// Options for a reconciliation run
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Only deployed resources in this namespace are deleted
    pub namespace: Option<String>,
    /// Checked before every operation
    pub cancel: CancellationToken,
}

impl ReconcileOptions {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Compute the change plan without applying it
pub fn plan(
    graph: &mut ResourceGraph,
    fetcher: &dyn StateFetcher,
    options: &ReconcileOptions,
) -> Result<ChangePlan> {
    diff::compute_plan(graph, fetcher, options.namespace.as_deref())
}

/// Reconcile deployed state with `graph`
///
/// Fails only when the graph is invalid, deployed state cannot be fetched,
/// or a declared resource belongs to another namespace. Per-operation
/// failures are reported in the returned [`ApplyReport`].
pub fn reconcile(
    graph: &mut ResourceGraph,
    fetcher: &dyn StateFetcher,
    api: &dyn RemoteApi,
    options: &ReconcileOptions,
) -> Result<ApplyReport> {
    reconcile_with(graph, fetcher, api, options, &mut NoProgress, &mut AutoConfirm)
}

/// [`reconcile`] with progress reporting and confirmation
///
/// A declined confirmation applies nothing and reports every operation as
/// skipped.
pub fn reconcile_with<P, C>(
    graph: &mut ResourceGraph,
    fetcher: &dyn StateFetcher,
    api: &dyn RemoteApi,
    options: &ReconcileOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ApplyReport>
where
    P: ProgressCallback + ?Sized,
    C: ConfirmCallback + ?Sized,
{
    let plan = plan(graph, fetcher, options)?;
    if plan.is_empty() {
        log::info!("Deployed state already matches the declared graph");
        return Ok(ApplyReport::default());
    }

    if !confirm.confirm(&plan) {
        log::info!("Plan declined; nothing applied");
        return Ok(declined(&plan, graph));
    }

    Ok(executor::apply(&plan, graph, api, progress, &options.cancel))
}

fn declined(plan: &ChangePlan, graph: &mut ResourceGraph) -> ApplyReport {
    let results = plan
        .iter()
        .enumerate()
        .map(|(index, planned)| {
            let operation = &planned.operation;
            if let Some(node) = operation.node() {
                graph.set_status(node, ResourceStatus::Declared);
            }
            ApplyResult {
                index,
                key: operation.key().clone(),
                kind: operation.kind(),
                outcome: ApplyOutcome::skipped("not confirmed"),
            }
        })
        .collect();
    ApplyReport {
        results,
        cancelled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel(name: &str, url: &str) -> Resource {
        Resource::new("Channel", name)
            .with_field("kind", "webhook")
            .with_field("webhook_url", url)
    }

    /// Credential ── Source ──┬── Window
    ///                        └── Validator
    /// Channel ── NotificationRule
    fn monitoring_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::with_standard_types();
        let cred = graph
            .add_root(
                Resource::new("Credential", "warehouse")
                    .with_field("kind", "postgres")
                    .with_field("secret", "hunter2"),
            )
            .unwrap();
        let source = graph
            .register_child(
                cred,
                Resource::new("Source", "orders")
                    .with_field("kind", "postgres")
                    .with_field("table", "public.orders")
                    .with_field("schedule", "0 * * * *"),
            )
            .unwrap();
        graph
            .register_child(
                source,
                Resource::new("Window", "hourly")
                    .with_field("kind", "tumbling")
                    .with_field("data_time_field", "created_at")
                    .with_field("window_size", json!({"hours": 1})),
            )
            .unwrap();
        graph
            .register_child(
                source,
                Resource::new("Validator", "row_count")
                    .with_field("kind", "volume")
                    .with_field("metric", "count")
                    .with_field("threshold", json!({"min": 100})),
            )
            .unwrap();
        let alerts = graph.add_root(channel("alerts", "https://a")).unwrap();
        graph
            .register_child(
                alerts,
                Resource::new("NotificationRule", "oncall")
                    .with_field("conditions", json!(["severity >= high"])),
            )
            .unwrap();
        graph
    }

    fn run(graph: &mut ResourceGraph, remote: &InMemoryRemote) -> ApplyReport {
        reconcile(graph, remote, remote, &ReconcileOptions::default()).unwrap()
    }

    #[test]
    fn test_fresh_graph_creates_everything_parents_first() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());

        let plan = plan(&mut graph, &remote, &ReconcileOptions::default()).unwrap();
        assert_eq!(plan.len(), graph.len());
        assert!(plan.operations().all(|op| op.kind() == OperationKind::Create));

        let position = |key: &ResourceKey| {
            plan.operations()
                .position(|op| op.key() == key)
                .unwrap()
        };
        for node in graph.walk_preorder() {
            if let Some(parent) = graph.parent(node) {
                let child_key = graph.get(node).unwrap().identity();
                let parent_key = graph.get(parent).unwrap().identity();
                assert!(position(&parent_key) < position(&child_key));
            }
        }
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());

        let first = run(&mut graph, &remote);
        assert!(first.is_success());
        assert_eq!(first.summary().created, 6);

        remote.clear_calls();
        let second = run(&mut graph, &remote);
        assert!(second.results.is_empty());
        assert!(remote.calls().iter().all(|c| c.starts_with("fetch")));
        for node in graph.walk_preorder() {
            let resource = graph.get(node).unwrap();
            assert_eq!(resource.status(), ResourceStatus::Applied);
            assert!(resource.id().is_some());
        }
    }

    #[test]
    fn test_round_trip_from_declared_graph() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::from_graph(&graph);

        // The store survives serialization without losing fields
        let json = serde_json::to_string(&remote.store()).unwrap();
        let store: RemoteStore = serde_json::from_str(&json).unwrap();
        let remote = InMemoryRemote::from_store(graph.registry_arc(), store);

        let plan = plan(&mut graph, &remote, &ReconcileOptions::default()).unwrap();
        assert!(plan.is_empty(), "unexpected plan: {plan:?}");
    }

    #[test]
    fn test_example_scenario() {
        let mut graph = ResourceGraph::with_standard_types();
        let alerts = graph.add_root(channel("alerts", "https://a")).unwrap();
        graph
            .register_child(alerts, Resource::new("NotificationRule", "rule1"))
            .unwrap();

        let remote = InMemoryRemote::new(graph.registry_arc());
        remote.seed(
            "Channel",
            "alerts",
            None,
            channel("alerts", "https://b").fields().clone(),
        );

        let plan = plan(&mut graph, &remote, &ReconcileOptions::default()).unwrap();
        let ops: Vec<&Operation> = plan.operations().collect();
        assert_eq!(ops.len(), 2);
        assert!(matches!(
            ops[0],
            Operation::Update { key, changes, .. }
                if key.name == "alerts"
                    && changes.len() == 1
                    && changes[0].field == "webhook_url"
                    && changes[0].to == json!("https://a")
        ));
        assert!(matches!(
            ops[1],
            Operation::Create { key, parent: Some(p), .. }
                if key.name == "rule1" && *p == alerts
        ));

        let report = run(&mut graph, &remote);
        assert!(report.is_success());
        assert_eq!(
            remote.record("Channel", "alerts").unwrap().fields["webhook_url"],
            json!("https://a")
        );
    }

    #[test]
    fn test_immutable_change_replaces_deployed_subtree() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());
        run(&mut graph, &remote);

        let source = graph.find("Source", "orders").unwrap();
        graph
            .get_mut(source)
            .unwrap()
            .set_field("table", "public.orders_v2");

        let plan = plan(&mut graph, &remote, &ReconcileOptions::default()).unwrap();
        assert!(!plan.operations().any(|op| op.kind() == OperationKind::Update));

        let deletes: Vec<String> = plan
            .operations()
            .filter(|op| op.kind() == OperationKind::Delete)
            .map(|op| op.key().name.clone())
            .collect();
        assert_eq!(deletes, vec!["hourly", "row_count", "orders"]);

        let report = run(&mut graph, &remote);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.summary().deleted, 3);
        assert_eq!(report.summary().created, 3);
        assert_eq!(
            remote.record("Source", "orders").unwrap().fields["table"],
            json!("public.orders_v2")
        );
        assert!(run(&mut graph, &remote).results.is_empty());
    }

    #[test]
    fn test_removed_declarations_are_deleted() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());
        run(&mut graph, &remote);

        let source = graph.find("Source", "orders").unwrap();
        graph.remove_subtree(source).unwrap();

        let report = run(&mut graph, &remote);
        assert!(report.is_success());
        assert_eq!(report.summary().deleted, 3);
        assert!(remote.record("Window", "hourly").is_none());
        assert!(remote.record("Credential", "warehouse").is_some());
    }

    #[test]
    fn test_failed_create_skips_descendants() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());
        remote.fail_on(
            OperationKind::Create,
            ResourceKey::new("Credential", "warehouse"),
            ApiError::new(401, "bad token"),
        );

        let report = run(&mut graph, &remote);
        let summary = report.summary();
        assert_eq!(summary.failed, 1);
        // Source, Window, Validator
        assert_eq!(summary.skipped, 3);
        // The unrelated channel tree still went through
        assert_eq!(summary.created, 2);

        let failure = report.failures().next().unwrap();
        assert_eq!(failure.key, ResourceKey::new("Credential", "warehouse"));
        let ApplyOutcome::Failed { error } = &failure.outcome else {
            panic!("expected a failure");
        };
        assert_eq!(error.category(), ErrorCategory::Unauthorized);

        // The next full run retries what did not get applied
        let retry = run(&mut graph, &remote);
        assert!(retry.is_success());
        assert_eq!(retry.summary().created, 4);
    }

    #[test]
    fn test_fetch_error_aborts_without_changes() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());
        remote.fail_fetch("Channel");

        let err = reconcile(&mut graph, &remote, &remote, &ReconcileOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(!err.is_programming_error());
        assert!(remote.is_empty());
    }

    #[test]
    fn test_declined_confirmation_applies_nothing() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());

        let report = reconcile_with(
            &mut graph,
            &remote,
            &remote,
            &ReconcileOptions::default(),
            &mut NoProgress,
            &mut AutoDecline,
        )
        .unwrap();

        assert_eq!(report.summary().skipped, 6);
        assert!(remote.is_empty());
        for node in graph.walk_preorder() {
            assert_eq!(graph.get(node).unwrap().status(), ResourceStatus::Declared);
        }
    }

    #[test]
    fn test_namespaced_runs_share_a_remote() {
        let remote = InMemoryRemote::new(std::sync::Arc::new(TypeRegistry::standard()))
            .with_namespace("team-a");
        remote.seed_in_namespace(
            "team-b",
            "Channel",
            "pager",
            None,
            channel("pager", "https://p").fields().clone(),
        );

        let mut graph = ResourceGraph::with_standard_types();
        graph.add_root(channel("alerts", "https://a")).unwrap();
        let options = ReconcileOptions::default().with_namespace("team-a");

        let report = reconcile(&mut graph, &remote, &remote, &options).unwrap();
        assert_eq!(report.summary().created, 1);
        assert_eq!(report.summary().deleted, 0);
        assert!(remote.record("Channel", "pager").is_some());

        let again = plan(&mut graph, &remote, &options).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_rotated_secret_converges() {
        let mut graph = monitoring_graph();
        let remote = InMemoryRemote::new(graph.registry_arc());
        assert!(run(&mut graph, &remote).is_success());

        // Secrets are never listed back, yet an unchanged one plans nothing
        let options = ReconcileOptions::default();
        assert!(plan(&mut graph, &remote, &options).unwrap().is_empty());

        let cred = graph.find("Credential", "warehouse").unwrap();
        graph.get_mut(cred).unwrap().set_field("secret", "correct-horse");
        let rotated = plan(&mut graph, &remote, &options).unwrap();
        let lines: Vec<String> = rotated.operations().map(ToString::to_string).collect();
        assert_eq!(lines, vec!["update Credential.warehouse (secret)"]);

        let report = run(&mut graph, &remote);
        assert_eq!(report.summary().updated, 1);
        let record = remote.record("Credential", "warehouse").unwrap();
        assert_eq!(record.fields["secret"], json!("correct-horse"));
        assert!(plan(&mut graph, &remote, &options).unwrap().is_empty());
    }
}
