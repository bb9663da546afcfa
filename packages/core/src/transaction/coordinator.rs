//! Transaction Coordinator - Execution Engine
//!
//! Runs every registered operation against one session and decides between
//! commit and abort.
//!
//! # State machine (per execute call)
//!
//! ```text
//! Idle ──acquire/start fails──▶ Failed            (nothing ran)
//! Idle ──▶ Running ──all ok────▶ Committed
//!                  └─any error──▶ Aborted          (nothing persisted)
//! ```
//!
//! # Modes
//!
//! - [`execute`](TransactionCoordinator::execute): operations run one at a
//!   time in registration order. The first failure stops the run; later
//!   operations never start.
//! - [`execute_concurrent`](TransactionCoordinator::execute_concurrent): every
//!   operation starts at once as its own tokio task, all sharing the session.
//!   The engine waits for all of them even after a failure, since peers cannot
//!   be cancelled safely mid-statement. When several operations fail, the one
//!   reported is whichever completed first; **which failure gets reported is
//!   not deterministic**. Only the guarantee that some failure is reported,
//!   and nothing is committed, holds.
//!
//! A panicking operation is reported as that operation's failure.

use crate::db::ConnectionShared;
use crate::transaction::cancel::{CancellationToken, Interrupt, Interruption};
use crate::transaction::error::{OperationError, TransactionError};
use crate::transaction::registry::{Operation, OperationRegistry};
use crate::transaction::session::{Session, SessionError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// How registered operations are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Concurrent,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// Result of the Running phase
enum RunOutcome {
    Completed,
    Failed { index: usize, error: OperationError },
    Interrupted(Interrupt),
}

/// Builder and executor for one atomic transaction attempt
///
/// Obtained from [`Connection::new_transaction`](crate::db::Connection::new_transaction).
/// Executing consumes the coordinator, so an attempt can never be replayed;
/// build a new one to retry.
#[must_use = "a transaction does nothing until executed"]
pub struct TransactionCoordinator {
    connection: Arc<ConnectionShared>,
    registry: OperationRegistry,
    cancellation: Option<CancellationToken>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("database", &self.connection.database())
            .field("operations", &self.registry.len())
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl TransactionCoordinator {
    pub(crate) fn new(connection: Arc<ConnectionShared>) -> Self {
        let timeout = connection.transaction_timeout();
        Self {
            connection,
            registry: OperationRegistry::new(),
            cancellation: None,
            timeout,
            deadline: None,
        }
    }

    /// Register an operation
    ///
    /// The closure receives the transaction's session; pass it to
    /// [`Collection`](crate::db::Collection) calls. Returning an error aborts
    /// the whole transaction.
    pub fn new_operation<F, Fut>(mut self, operation: F) -> Self
    where
        F: FnOnce(Session) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        self.registry.push(operation);
        self
    }

    /// Number of registered operations
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Abort instead of committing if `token` is cancelled before commit
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Time budget measured from the start of execution; overrides the
    /// connection's default transaction timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Absolute deadline; combined with any timeout, the earlier one wins
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run operations one at a time in registration order, stopping at the
    /// first failure, then commit or abort
    pub async fn execute(self) -> Result<(), TransactionError> {
        self.run(ExecutionMode::Sequential).await
    }

    /// Run all operations concurrently on the shared session, wait for every
    /// one of them, then commit or abort
    ///
    /// If several operations fail, which error is returned is not
    /// deterministic.
    pub async fn execute_concurrent(self) -> Result<(), TransactionError> {
        self.run(ExecutionMode::Concurrent).await
    }

    async fn run(self, mode: ExecutionMode) -> Result<(), TransactionError> {
        let TransactionCoordinator {
            connection,
            registry,
            cancellation,
            timeout,
            deadline,
        } = self;

        let deadline = match (deadline, timeout.map(|t| Instant::now() + t)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let interruption = Interruption::new(cancellation, deadline);

        if let Some(reason) = interruption.check() {
            tracing::debug!(%reason, "transaction interrupted before start");
            return Err(TransactionError::Interrupted {
                reason,
                rolled_back: false,
                abort_error: None,
            });
        }

        // Acquire; may queue behind another transaction on this connection
        let session = tokio::select! {
            session = connection.start_session() => {
                session.map_err(TransactionError::SessionUnavailable)?
            }
            reason = interruption.fired() => {
                tracing::debug!(%reason, "transaction interrupted while waiting for a session");
                return Err(TransactionError::Interrupted {
                    reason,
                    rolled_back: false,
                    abort_error: None,
                });
            }
        };

        // Begin
        session
            .start_transaction()
            .await
            .map_err(TransactionError::Start)?;

        let operations = registry.into_operations();
        tracing::debug!(
            session = %session.id(),
            %mode,
            operations = operations.len(),
            "running transaction"
        );

        // Run
        let outcome = match mode {
            ExecutionMode::Sequential => run_sequential(&session, operations, &interruption).await,
            ExecutionMode::Concurrent => run_concurrent(&session, operations, &interruption).await,
        };

        // Decide
        match outcome {
            RunOutcome::Completed => {
                // Never commit once the caller has given up
                if let Some(reason) = interruption.check() {
                    let abort_error = abort(&session).await;
                    return Err(TransactionError::Interrupted {
                        reason,
                        rolled_back: true,
                        abort_error,
                    });
                }

                if let Err(source) = session.commit().await {
                    tracing::warn!(session = %session.id(), "commit failed: {}", source);
                    let abort_error = abort(&session).await;
                    return Err(TransactionError::Commit {
                        source,
                        abort_error,
                    });
                }
                Ok(())
            }
            RunOutcome::Failed { index, error } => {
                tracing::debug!(
                    session = %session.id(),
                    operation = index,
                    "operation failed, aborting: {:#}",
                    error
                );
                let abort_error = abort(&session).await;
                Err(TransactionError::Operation {
                    index,
                    source: error,
                    abort_error,
                })
            }
            RunOutcome::Interrupted(reason) => {
                tracing::warn!(session = %session.id(), %reason, "transaction interrupted, aborting");
                let abort_error = abort(&session).await;
                Err(TransactionError::Interrupted {
                    reason,
                    rolled_back: true,
                    abort_error,
                })
            }
        }
    }
}

/// Roll back, returning the failure as supplementary context
async fn abort(session: &Session) -> Option<SessionError> {
    match session.abort().await {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(session = %session.id(), "abort failed: {}", e);
            Some(e)
        }
    }
}

/// Run one operation body inside its own task so a panic is contained
fn spawn_operation(
    operation: Operation,
    session: Session,
) -> tokio::task::JoinHandle<Result<(), OperationError>> {
    tokio::spawn(async move { operation(session).await })
}

/// Collapse a joined task into the operation's result
fn flatten(
    index: usize,
    joined: Result<Result<(), OperationError>, JoinError>,
) -> Result<(), OperationError> {
    match joined {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            let payload = join_error.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(anyhow::anyhow!("operation #{} panicked: {}", index, message))
        }
        Err(join_error) => Err(anyhow::anyhow!(
            "operation #{} did not complete: {}",
            index,
            join_error
        )),
    }
}

async fn run_sequential(
    session: &Session,
    operations: Vec<Operation>,
    interruption: &Interruption,
) -> RunOutcome {
    for (index, operation) in operations.into_iter().enumerate() {
        let mut handle = spawn_operation(operation, session.clone());

        let joined = tokio::select! {
            // A finished operation wins over an interrupt that fired alongside it
            biased;

            joined = &mut handle => joined,
            reason = interruption.fired() => {
                handle.abort();
                let _ = handle.await;
                return RunOutcome::Interrupted(reason);
            }
        };

        if let Err(error) = flatten(index, joined) {
            return RunOutcome::Failed { index, error };
        }
    }
    RunOutcome::Completed
}

async fn run_concurrent(
    session: &Session,
    operations: Vec<Operation>,
    interruption: &Interruption,
) -> RunOutcome {
    let total = operations.len();
    let mut abort_handles = Vec::with_capacity(total);
    // Waiters report (index, joined result) in completion order; each waiter
    // only awaits its operation's handle, so it cannot panic itself
    let mut waiters = JoinSet::new();

    for (index, operation) in operations.into_iter().enumerate() {
        let handle = spawn_operation(operation, session.clone());
        abort_handles.push(handle.abort_handle());
        waiters.spawn(async move { (index, handle.await) });
    }

    let mut reported = vec![false; total];
    let mut first_failure: Option<(usize, OperationError)> = None;
    let mut lost_waiter: Option<JoinError> = None;
    let mut interrupted: Option<Interrupt> = None;

    loop {
        let next = if interrupted.is_some() {
            waiters.join_next().await
        } else {
            tokio::select! {
                biased;

                next = waiters.join_next() => next,
                reason = interruption.fired() => {
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    interrupted = Some(reason);
                    continue;
                }
            }
        };

        match next {
            None => break,
            Some(Ok((index, joined))) => {
                reported[index] = true;
                if let Err(error) = flatten(index, joined) {
                    if interrupted.is_some() {
                        continue;
                    }
                    match first_failure {
                        None => first_failure = Some((index, error)),
                        Some((first, _)) => tracing::debug!(
                            session = %session.id(),
                            operation = index,
                            first_failure = first,
                            "additional operation failure: {:#}",
                            error
                        ),
                    }
                }
            }
            Some(Err(join_error)) => {
                tracing::error!(session = %session.id(), "operation waiter lost: {}", join_error);
                lost_waiter = Some(join_error);
            }
        }
    }

    if let Some((index, error)) = first_failure {
        return RunOutcome::Failed { index, error };
    }
    if let Some(reason) = interrupted {
        return RunOutcome::Interrupted(reason);
    }
    if let Some(join_error) = lost_waiter {
        // Outcome of the unreported operation is unknown; treat it as failed
        let index = reported.iter().position(|r| !r).unwrap_or(0);
        return RunOutcome::Failed {
            index,
            error: anyhow::anyhow!("operation #{} result was lost: {}", index, join_error),
        };
    }
    RunOutcome::Completed
}
