//! Transaction error types
//!
//! One [`TransactionError`] is returned per failed execute call. Operation
//! failures always stay the primary error; an abort that also failed is
//! attached as `abort_error` and never takes its place.

use crate::db::DatabaseError;
use crate::transaction::cancel::Interrupt;
use crate::transaction::session::SessionError;
use thiserror::Error;

/// Error returned by an operation closure
///
/// Opaque to the engine: only its presence matters. Any error type converts
/// into it with `?`.
pub type OperationError = anyhow::Error;

/// Failure of an `execute` / `execute_concurrent` call
#[derive(Error, Debug)]
pub enum TransactionError {
    /// No session could be obtained; nothing ran
    #[error("Could not acquire a session: {0}")]
    SessionUnavailable(#[source] DatabaseError),

    /// The store refused to begin a transaction; nothing ran
    #[error("Could not start transaction: {0}")]
    Start(#[source] SessionError),

    /// An operation failed and the transaction was rolled back
    ///
    /// `index` is the operation's registration position. In concurrent mode,
    /// when several operations fail, which one is reported is not
    /// deterministic.
    #[error("Operation #{index} failed, transaction aborted: {source}")]
    Operation {
        index: usize,
        source: OperationError,
        abort_error: Option<SessionError>,
    },

    /// Every operation succeeded but the store refused to commit
    #[error("Could not commit transaction: {source}")]
    Commit {
        source: SessionError,
        abort_error: Option<SessionError>,
    },

    /// Cancellation or deadline fired before commit
    #[error("Transaction interrupted: {reason}")]
    Interrupted {
        reason: Interrupt,
        rolled_back: bool,
        abort_error: Option<SessionError>,
    },
}

impl TransactionError {
    /// `true` when operations ran and their effects were discarded, `false`
    /// when the call failed before any operation started
    pub fn rolled_back(&self) -> bool {
        match self {
            TransactionError::SessionUnavailable(_) | TransactionError::Start(_) => false,
            TransactionError::Operation { .. } | TransactionError::Commit { .. } => true,
            TransactionError::Interrupted { rolled_back, .. } => *rolled_back,
        }
    }

    /// Supplementary rollback failure, if the abort itself failed
    pub fn abort_error(&self) -> Option<&SessionError> {
        match self {
            TransactionError::Operation { abort_error, .. }
            | TransactionError::Commit { abort_error, .. }
            | TransactionError::Interrupted { abort_error, .. } => abort_error.as_ref(),
            _ => None,
        }
    }

    /// Registration index of the failed operation
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            TransactionError::Operation { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The operation's own error, for downcasting to the caller's type
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            TransactionError::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            TransactionError::Interrupted { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
