//! Operation Registry
//!
//! Ordered, append-only list of operation closures. Registration order is the
//! execution order in sequential mode and the index reported on failure in
//! both modes.

use crate::transaction::error::OperationError;
use crate::transaction::session::Session;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by a registered operation
pub type OperationFuture = Pin<Box<dyn Future<Output = Result<(), OperationError>> + Send>>;

/// One unit of work: consumes a session handle, reports success or failure
pub(crate) type Operation = Box<dyn FnOnce(Session) -> OperationFuture + Send>;

/// Operations accumulated for one transaction attempt
#[derive(Default)]
pub struct OperationRegistry {
    operations: Vec<Operation>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation; no deduplication
    pub fn push<F, Fut>(&mut self, operation: F)
    where
        F: FnOnce(Session) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        self.operations
            .push(Box::new(move |session| Box::pin(operation(session))));
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}
