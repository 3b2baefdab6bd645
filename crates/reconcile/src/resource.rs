//! Declared resources
//!
//! A Resource is a named, typed unit of desired state. Its fields are plain
//! JSON values; which of them are mutable is decided by the type's
//! [`ResourceSchema`](crate::schema::ResourceSchema), not by the resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Field values of a resource, keyed by field name
pub type Fields = BTreeMap<String, Value>;

/// Stable identity of a resource across runs: `(type_name, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub type_name: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.name)
    }
}

/// Where a resource is in its reconciliation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Constructed, not yet reconciled
    #[default]
    Declared,
    /// Included in a change plan
    Planned,
    /// Its operation is in flight
    Applying,
    /// Matches the deployed state
    Applied,
    /// Its operation failed
    Failed,
}

impl ResourceStatus {
    /// Check if the status ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}

/// A declared resource
///
/// # Example
///
/// ```
/// use reconcile::Resource;
///
/// let channel = Resource::new("Channel", "alerts")
///     .with_field("kind", "webhook")
///     .with_field("webhook_url", "https://a");
///
/// assert_eq!(channel.identity().to_string(), "Channel.alerts");
/// assert!(channel.id().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    type_name: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    fields: Fields,
    #[serde(skip)]
    status: ResourceStatus,
}

impl Resource {
    /// Create a resource with no fields
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            id: None,
            fields: Fields::new(),
            status: ResourceStatus::Declared,
        }
    }

    /// Set a field value
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Replace all field values
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// Set a field value in place
    ///
    /// The graph re-validates fields before every run, so a field the
    /// schema does not know about is reported then.
    pub fn set_field(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Remove a field value
    pub fn remove_field(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Get `(type_name, name)`
    pub fn identity(&self) -> ResourceKey {
        ResourceKey::new(&self.type_name, &self.name)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server-assigned id, known after the first successful apply
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Get a field value, if set
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub(crate) fn clear_id(&mut self) {
        self.id = None;
    }

    pub(crate) fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
    }
}
