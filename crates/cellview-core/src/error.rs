//! Error taxonomy for cache revalidation.
//!
//! Collaborator failures are transient by contract: a failed pass aborts
//! without mutating the per-viewer cache and is retried on the next tick.
//! Everything else in the subsystem recovers locally (stale references fall
//! back from unload to delete, sends to a torn-down transport are dropped)
//! and never surfaces here.

use thiserror::Error;

use crate::cell::CellId;

/// Transient failure reported by an external collaborator (visibility query
/// or access policy).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct QueryError {
    reason: String,
}

impl QueryError {
    /// Creates a query error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors that abort a single revalidation pass.
///
/// A pass that fails leaves the cache exactly as it was before the pass
/// started; the caller logs the failure and retries on the next tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevalidationError {
    /// The visibility query failed for the whole pass.
    #[error("visibility query failed: {0}")]
    Visibility(#[source] QueryError),

    /// The access policy failed while evaluating a cell.
    #[error("access policy failed for {cell}: {source}")]
    Access {
        /// The cell being evaluated when the policy failed.
        cell: CellId,
        /// The underlying collaborator failure.
        #[source]
        source: QueryError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_failing_collaborator() {
        let err = RevalidationError::Visibility(QueryError::new("index offline"));
        assert_eq!(err.to_string(), "visibility query failed: index offline");

        let err = RevalidationError::Access {
            cell: CellId::new(7),
            source: QueryError::new("policy store timeout"),
        };
        assert!(err.to_string().contains("cell-7"));
    }
}
