//! Error types for reconciliation.
//!
//! Errors fall into three groups:
//! - programming errors raised while building a type registry or a graph
//!   (always fatal, never retried)
//! - fetch errors raised while gathering deployed state (fatal to the run)
//! - per-operation API errors, which are recorded in the apply report and
//!   never returned to the caller

use crate::resource::ResourceKey;
use serde::Serialize;
use thiserror::Error;

/// Errors that abort graph construction or a reconciliation run.
#[derive(Debug, Error)]
pub enum Error {
    /// A field is declared inconsistently by a schema, or a resource carries
    /// fields its schema does not account for.
    #[error("field classification error for type '{type_name}', field '{field}': {reason}")]
    FieldClassification {
        /// Resource type the error was found on
        type_name: String,
        /// Offending field name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// A child with the same identity is already registered.
    #[error("duplicate child {child} under {parent}")]
    DuplicateChild {
        /// Parent the child was being added to
        parent: ResourceKey,
        /// Identity of the rejected child
        child: ResourceKey,
    },

    /// A root with the same identity is already registered.
    #[error("duplicate root {0}")]
    DuplicateRoot(ResourceKey),

    /// The resource type has not been registered.
    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),

    /// The resource type was registered twice.
    #[error("resource type '{0}' is already registered")]
    DuplicateResourceType(String),

    /// A resource was attached to a parent of the wrong type, or a child
    /// type was added as a root.
    #[error("invalid parent for {child}: {reason}")]
    InvalidParent {
        /// Identity of the rejected resource
        child: ResourceKey,
        /// Why the parent is not acceptable
        reason: String,
    },

    /// A node handle does not refer to a live resource in this graph.
    #[error("node {0} is not part of this graph")]
    UnknownNode(usize),

    /// Deployed state could not be fetched.
    #[error("failed to fetch deployed '{type_name}' resources: {source}")]
    Fetch {
        /// Type being fetched when the error happened
        type_name: String,
        /// Underlying collaborator error
        #[source]
        source: FetchError,
    },

    /// A declared resource matches a deployed resource owned by another
    /// namespace.
    #[error(
        "{key} does not belong to the current namespace; resource namespace = {found}; current namespace = {expected}"
    )]
    NamespaceConflict {
        /// Identity of the conflicting resource
        key: ResourceKey,
        /// Namespace configured for this run
        expected: String,
        /// Namespace reported by the remote system
        found: String,
    },
}

impl Error {
    /// Whether this error comes from an invalid declaration rather than
    /// from the remote system.
    pub fn is_programming_error(&self) -> bool {
        !matches!(self, Self::Fetch { .. } | Self::NamespaceConflict { .. })
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by a [`StateFetcher`](crate::state::StateFetcher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{cause}")]
pub struct FetchError {
    /// Human-readable cause (network failure, auth failure, not found...)
    pub cause: String,
}

impl FetchError {
    /// Create a fetch error from any displayable cause.
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// Categories of remote API errors.
///
/// Used to decide whether a failure can be ignored and what to tell the
/// user about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The target does not exist
    NotFound,
    /// The request conflicts with current remote state
    Conflict,
    /// The request was rejected as malformed
    Invalid,
    /// Authentication or authorization failed
    Unauthorized,
    /// The remote system is unavailable (transient)
    Unavailable,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Map an HTTP-like status code to a category.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            409 => Self::Conflict,
            400 | 422 => Self::Invalid,
            401 | 403 => Self::Unauthorized,
            429 | 502..=504 => Self::Unavailable,
            _ => Self::Other,
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::NotFound => "The resource no longer exists remotely; run again to re-plan",
            Self::Conflict => "Remote state changed underneath the plan; run again to re-plan",
            Self::Invalid => "Check the declared field values for this resource",
            Self::Unauthorized => "Check the credentials used to reach the remote system",
            Self::Unavailable => "The remote system is unavailable; try again later",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Error returned by a [`RemoteApi`](crate::state::RemoteApi) call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("API error {status}: {message}")]
pub struct ApiError {
    /// HTTP-like status code
    pub status: u16,
    /// Message reported by the remote system
    pub message: String,
}

impl ApiError {
    /// Create an API error.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for a 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// Shorthand for a 409.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_status(self.status)
    }

    /// Whether the target is already gone.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}
