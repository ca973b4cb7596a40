//! Defines the primary error type for the executor core.

use crate::core::node::NodeId;
use std::sync::Arc;
use thiserror::Error;

/// All failures the core can observe from its external collaborators,
/// per spec §7. "Not-yet" conditions (initial sync not ready, destination
/// lagging) are deliberately *not* variants here — they are ordinary
/// control flow handled by the task step functions returning a retry
/// `StepOutcome`, not an error.
#[derive(Error, Debug)]
pub enum ShardlordError {
    /// Network-level failure talking to a worker: connect refused, reset,
    /// or a wire-protocol decode failure. Always a candidate for retry
    /// after `cmd_retry_naptime`.
    #[error("I/O error talking to node {node}: {source}")]
    Io {
        node: NodeId,
        source: Arc<std::io::Error>,
    },

    /// A batch statement failed on a remote node. Carries the remote
    /// node and the executor's own description of the failed statement
    /// (never raw driver internals, since the wire protocol here is our
    /// own framed protocol, not a live SQL error object).
    #[error("SQL statement failed on node {node}: {message}")]
    Sql { node: NodeId, message: String },

    /// A `RemoteSqlClient` operation was attempted while no connection
    /// to the node exists and none is in the process of being
    /// established.
    #[error("no connection to node {0}")]
    NotConnected(NodeId),

    /// A row-returning query required to produce exactly one row
    /// returned zero or more than one (spec §7, "structural bug
    /// or impossible catalog state"). Callers may retry this by policy;
    /// it is logged at a higher level than an ordinary transient error.
    #[error("expected exactly one row from query on node {node}, got {got}")]
    UnexpectedRowCount { node: NodeId, got: usize },

    /// The metadata store rejected a read or write (spec §6.2).
    #[error("metadata store error: {0}")]
    Metadata(String),

    /// A precondition failed at task admission (spec §7): the task is
    /// marked FAILED immediately, no remote side effects are issued.
    #[error("admission rejected: {0}")]
    AdmissionRejected(String),

    /// Coordinator-internal failure: fatal, the process should exit and
    /// be restarted by its supervisor (spec §7).
    #[error("internal coordinator failure: {0}")]
    Internal(String),

    /// Malformed configuration discovered at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

// `std::io::Error` is not `Clone`; wrap it in an `Arc` so `ShardlordError`
// itself can be cloned cheaply, which the CP state machine's tests rely on
// when asserting a failed step's error against an expected value.
impl Clone for ShardlordError {
    fn clone(&self) -> Self {
        match self {
            ShardlordError::Io { node, source } => ShardlordError::Io {
                node: *node,
                source: Arc::clone(source),
            },
            ShardlordError::Sql { node, message } => ShardlordError::Sql {
                node: *node,
                message: message.clone(),
            },
            ShardlordError::NotConnected(n) => ShardlordError::NotConnected(*n),
            ShardlordError::UnexpectedRowCount { node, got } => ShardlordError::UnexpectedRowCount {
                node: *node,
                got: *got,
            },
            ShardlordError::Metadata(s) => ShardlordError::Metadata(s.clone()),
            ShardlordError::AdmissionRejected(s) => ShardlordError::AdmissionRejected(s.clone()),
            ShardlordError::Internal(s) => ShardlordError::Internal(s.clone()),
            ShardlordError::Config(s) => ShardlordError::Config(s.clone()),
        }
    }
}

impl PartialEq for ShardlordError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ShardlordError::Io { node: n1, source: s1 }, ShardlordError::Io { node: n2, source: s2 }) => {
                n1 == n2 && s1.to_string() == s2.to_string()
            }
            (ShardlordError::Sql { node: n1, message: m1 }, ShardlordError::Sql { node: n2, message: m2 }) => {
                n1 == n2 && m1 == m2
            }
            (ShardlordError::NotConnected(a), ShardlordError::NotConnected(b)) => a == b,
            (
                ShardlordError::UnexpectedRowCount { node: n1, got: g1 },
                ShardlordError::UnexpectedRowCount { node: n2, got: g2 },
            ) => n1 == n2 && g1 == g2,
            (ShardlordError::Metadata(a), ShardlordError::Metadata(b)) => a == b,
            (ShardlordError::AdmissionRejected(a), ShardlordError::AdmissionRejected(b)) => a == b,
            (ShardlordError::Internal(a), ShardlordError::Internal(b)) => a == b,
            (ShardlordError::Config(a), ShardlordError::Config(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_preserves_io_message() {
        let err = ShardlordError::Io {
            node: NodeId(3),
            source: Arc::new(std::io::Error::other("reset")),
        };
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }

    #[test]
    fn distinct_variants_are_not_equal() {
        let a = ShardlordError::NotConnected(NodeId(1));
        let b = ShardlordError::AdmissionRejected("dst already owns partition".into());
        assert_ne!(a, b);
    }
}
