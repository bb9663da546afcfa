//! Transactions
//!
//! Composes independently written store operations into one atomic unit of
//! work:
//!
//! - [`session`] - Session adapter: start, commit and abort on a store session
//! - [`driver`] - Store-specific transaction statements behind a trait
//! - [`registry`] - Ordered, append-only list of operation closures
//! - [`coordinator`] - Execution engine: sequential or concurrent run, then
//!   commit or abort
//! - [`cancel`] - Caller-driven cancellation and deadlines

pub mod cancel;
pub mod coordinator;
pub mod driver;
mod error;
pub mod registry;
pub mod session;

pub use cancel::{CancellationToken, Interrupt};
pub use coordinator::{ExecutionMode, TransactionCoordinator};
pub use driver::{SqlTransactionDriver, TransactionDriver};
pub use error::{OperationError, TransactionError};
pub use registry::{OperationFuture, OperationRegistry};
pub use session::{Session, SessionError, SessionState};
