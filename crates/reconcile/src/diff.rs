//! Differ - declared graph vs deployed state
//!
//! Produces a [`ChangePlan`] in three passes:
//!
//! 1. Walk declared resources parents-first and decide, per resource, whether
//!    it is new, must be replaced, needs an in-place update or is in sync.
//!    A replacement marks the whole deployed subtree for deletion.
//! 2. Emit deletes for deployed resources that are replaced or no longer
//!    declared, children before parents.
//! 3. Emit creates and updates, parents before children.

use crate::error::{Error, Result};
use crate::graph::{NodeId, ResourceGraph};
use crate::plan::{ChangePlan, CreateReason, DeleteReason, FieldChange, Operation};
use crate::resource::{Fields, Resource, ResourceKey, ResourceStatus};
use crate::schema::ResourceSchema;
use crate::state::{ActualNode, ActualState, StateFetcher};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

enum Decision {
    Create {
        reason: CreateReason,
        replaces: Option<usize>,
    },
    Update {
        id: String,
        changes: Vec<FieldChange>,
    },
    InSync {
        id: String,
    },
}

/// Compute the plan that moves deployed state to the declared graph
///
/// Validates the graph before fetching anything. Resources found in sync are
/// marked `Applied` and get their server id; resources with an operation are
/// marked `Planned`.
pub fn compute_plan(
    graph: &mut ResourceGraph,
    fetcher: &dyn StateFetcher,
    namespace: Option<&str>,
) -> Result<ChangePlan> {
    graph.validate()?;
    graph.reset_statuses();

    let actual = ActualState::fetch(graph.registry(), fetcher)?;
    log::debug!(
        "Diffing {} declared against {} deployed resource(s)",
        graph.len(),
        actual.len()
    );

    let mut matched: HashSet<usize> = HashSet::new();
    let mut forced: HashMap<usize, DeleteReason> = HashMap::new();
    let mut decisions: Vec<(NodeId, Decision)> = Vec::with_capacity(graph.len());

    for node in graph.walk_preorder() {
        let Some(declared) = graph.get(node) else {
            continue;
        };
        let key = declared.identity();

        let Some(idx) = actual.find(&key) else {
            decisions.push((
                node,
                Decision::Create {
                    reason: CreateReason::New,
                    replaces: None,
                },
            ));
            continue;
        };
        let Some(deployed) = actual.get(idx) else {
            continue;
        };
        check_namespace(&key, deployed, namespace)?;
        matched.insert(idx);

        if forced.contains_key(&idx) {
            log::debug!("{key} is below a replaced resource and will be re-created");
            decisions.push((
                node,
                Decision::Create {
                    reason: CreateReason::Replacement,
                    replaces: Some(idx),
                },
            ));
            continue;
        }

        let schema = graph.registry().require(declared.type_name())?;
        let declared_parent = graph
            .parent(node)
            .and_then(|p| graph.get(p))
            .map(Resource::identity);
        let deployed_parent = actual
            .parent(idx)
            .and_then(|p| actual.get(p))
            .map(ActualNode::key);

        if declared_parent != deployed_parent || immutable_differs(schema, declared, deployed) {
            log::debug!("{key} changed an immutable field or its parent; replacing");
            let subtree = actual.subtree_postorder(idx);
            for below in subtree.iter().filter_map(|&i| actual.get(i)) {
                check_namespace(&below.key(), below, namespace)?;
            }
            for descendant in subtree {
                let reason = if descendant == idx {
                    DeleteReason::Replaced
                } else {
                    DeleteReason::Cascade
                };
                forced.insert(descendant, reason);
            }
            decisions.push((
                node,
                Decision::Create {
                    reason: CreateReason::Replacement,
                    replaces: Some(idx),
                },
            ));
            continue;
        }

        let id = deployed.resource.id.clone();
        let mut changes = mutable_changes(schema, declared, deployed);
        changes.extend(secret_changes(schema, declared, &id, fetcher)?);
        if changes.is_empty() {
            decisions.push((node, Decision::InSync { id }));
        } else {
            decisions.push((node, Decision::Update { id, changes }));
        }
    }

    let mut plan = ChangePlan::new();

    // Deletes, children first
    let mut delete_index: HashMap<usize, usize> = HashMap::new();
    for idx in actual.postorder() {
        let Some(deployed) = actual.get(idx) else {
            continue;
        };
        let reason = match forced.get(&idx) {
            Some(reason) => *reason,
            None if matched.contains(&idx) => continue,
            None if !owned(deployed, namespace) => {
                log::debug!(
                    "Leaving {} alone; it belongs to namespace {:?}",
                    deployed.key(),
                    deployed.resource.namespace
                );
                continue;
            }
            None if holds_foreign(&actual, idx, namespace) => {
                log::debug!(
                    "Keeping {}; resources of another namespace live below it",
                    deployed.key()
                );
                continue;
            }
            None => DeleteReason::Removed,
        };
        let depends_on = deployed
            .children
            .iter()
            .filter_map(|c| delete_index.get(c).copied())
            .collect();
        let at = plan.push(
            Operation::Delete {
                key: deployed.key(),
                id: deployed.resource.id.clone(),
                reason,
            },
            depends_on,
        );
        delete_index.insert(idx, at);
    }

    // Creates and updates, parents first
    let mut op_index: HashMap<NodeId, usize> = HashMap::new();
    for (node, decision) in decisions {
        let parent = graph.parent(node);
        let mut depends_on: Vec<usize> = parent
            .and_then(|p| op_index.get(&p).copied())
            .into_iter()
            .collect();

        let operation = match decision {
            Decision::InSync { id } => {
                graph.set_id(node, &id);
                graph.set_status(node, ResourceStatus::Applied);
                continue;
            }
            Decision::Update { id, changes } => {
                graph.set_id(node, &id);
                Operation::Update {
                    node,
                    key: identity(graph, node),
                    id,
                    changes,
                }
            }
            Decision::Create { reason, replaces } => {
                if let Some(old) = replaces.and_then(|r| delete_index.get(&r)) {
                    depends_on.push(*old);
                }
                graph.clear_id(node);
                Operation::Create {
                    node,
                    key: identity(graph, node),
                    parent,
                    fields: graph.get(node).map(|r| r.fields().clone()).unwrap_or_default(),
                    reason,
                }
            }
        };

        graph.set_status(node, ResourceStatus::Planned);
        let at = plan.push(operation, depends_on);
        op_index.insert(node, at);
    }

    log::info!("Planned {}", plan.summary());
    Ok(plan)
}

fn identity(graph: &ResourceGraph, node: NodeId) -> ResourceKey {
    graph
        .get(node)
        .map(Resource::identity)
        .unwrap_or_else(|| ResourceKey::new("", ""))
}

/// Whether a deployed resource may be deleted by this run
fn owned(deployed: &ActualNode, namespace: Option<&str>) -> bool {
    deployed.resource.owned_by(namespace)
}

/// Whether anything below a deployed resource belongs to another namespace
fn holds_foreign(actual: &ActualState, idx: usize, namespace: Option<&str>) -> bool {
    actual
        .subtree_postorder(idx)
        .into_iter()
        .filter_map(|i| actual.get(i))
        .any(|below| !owned(below, namespace))
}

fn check_namespace(key: &ResourceKey, deployed: &ActualNode, namespace: Option<&str>) -> Result<()> {
    if owned(deployed, namespace) {
        return Ok(());
    }
    Err(Error::NamespaceConflict {
        key: key.clone(),
        expected: namespace.unwrap_or_default().to_string(),
        found: deployed.resource.namespace.clone().unwrap_or_default(),
    })
}

fn value_of<'a>(value: Option<&'a Value>) -> &'a Value {
    value.unwrap_or(&Value::Null)
}

fn immutable_differs(schema: &ResourceSchema, declared: &Resource, deployed: &ActualNode) -> bool {
    let deployed_fields = deployed.resource.fields();
    schema
        .immutable_fields()
        .into_iter()
        .filter(|field| !schema.is_secret(field))
        .any(|field| value_of(declared.field(field)) != value_of(deployed_fields.get(field)))
}

fn mutable_changes(
    schema: &ResourceSchema,
    declared: &Resource,
    deployed: &ActualNode,
) -> Vec<FieldChange> {
    let deployed_fields = deployed.resource.fields();
    schema
        .fields
        .iter()
        .filter(|f| !f.is_immutable() && !f.secret)
        .filter_map(|f| {
            let from = value_of(deployed_fields.get(&f.name));
            let to = value_of(declared.field(&f.name));
            (from != to).then(|| FieldChange {
                field: f.name.clone(),
                from: from.clone(),
                to: to.clone(),
                secret: f.secret,
            })
        })
        .collect()
}

/// Declared secrets, as changes when the remote reports them stale
///
/// Secret values never come back from a fetch, so an unset secret is left
/// alone and a set one is checked through the fetcher.
fn secret_changes(
    schema: &ResourceSchema,
    declared: &Resource,
    id: &str,
    fetcher: &dyn StateFetcher,
) -> Result<Vec<FieldChange>> {
    let secrets: Fields = schema
        .fields
        .iter()
        .filter(|f| f.secret && !f.is_immutable())
        .filter_map(|f| declared.field(&f.name).map(|v| (f.name.clone(), v.clone())))
        .collect();
    if secrets.is_empty() {
        return Ok(Vec::new());
    }

    let changed = fetcher
        .secret_changed(&schema.type_name, id, &secrets)
        .map_err(|source| Error::Fetch {
            type_name: schema.type_name.clone(),
            source,
        })?;
    if !changed {
        return Ok(Vec::new());
    }
    Ok(secrets
        .into_iter()
        .map(|(field, to)| FieldChange {
            field,
            from: Value::Null,
            to,
            secret: true,
        })
        .collect())
}
