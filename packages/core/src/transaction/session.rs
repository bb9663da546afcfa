//! Session Adapter
//!
//! A [`Session`] is one store connection carrying at most one transaction.
//! Operation closures receive a clone of the session and issue their store
//! calls through [`Collection`](crate::db::Collection) methods; the lifecycle
//! calls (`start_transaction`, `commit`, `abort`) are crate-private so only the
//! execution engine can end a transaction.
//!
//! # Concurrency
//!
//! libsql connections are not meant for unsynchronized use by several logical
//! operations at once. Every access goes through the session's
//! `tokio::sync::Mutex`, which serializes statements issued by concurrent
//! operation tasks sharing the session.
//!
//! A session also carries its connection's writer turn. It is given back when
//! the transaction commits or aborts, which lets the next queued session begin.

use crate::db::{StorageError, StorageErrorKind};
use crate::transaction::driver::TransactionDriver;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use uuid::Uuid;

/// Transaction lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No transaction started yet
    Idle = 0,
    /// Transaction open; operations may issue store calls
    Active = 1,
    /// Transaction committed; session released
    Committed = 2,
    /// Transaction rolled back; session released
    Aborted = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Active,
            2 => SessionState::Committed,
            _ => SessionState::Aborted,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Committed => "committed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Session lifecycle failures (start, commit, abort)
#[derive(Error, Debug)]
pub enum SessionError {
    /// Lifecycle call not allowed in the session's current state
    #[error("Session {session} cannot {action}: transaction is {state}")]
    InvalidState {
        session: Uuid,
        action: &'static str,
        state: SessionState,
    },

    /// The store refused the lifecycle call
    #[error("Store rejected {action} on session {session}: {source}")]
    Store {
        session: Uuid,
        action: &'static str,
        source: anyhow::Error,
    },
}

struct SessionInner {
    id: Uuid,
    conn: Mutex<libsql::Connection>,
    state: AtomicU8,
    driver: Arc<dyn TransactionDriver>,
    writer: std::sync::Mutex<Option<OwnedMutexGuard<()>>>,
}

/// Handle to an active transactional context
///
/// Cheap to clone; all clones refer to the same store connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        conn: libsql::Connection,
        driver: Arc<dyn TransactionDriver>,
        writer: Option<OwnedMutexGuard<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                conn: Mutex::new(conn),
                state: AtomicU8::new(SessionState::Idle as u8),
                driver,
                writer: std::sync::Mutex::new(writer),
            }),
        }
    }

    /// Unique identifier, used in logs and error messages
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Hand the connection's writer turn to the next session
    ///
    /// Leaked clones keep the session alive, so the turn cannot wait for drop.
    fn release_writer(&self) {
        let guard = match self.inner.writer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(guard);
    }

    fn require(&self, expected: SessionState, action: &'static str) -> Result<(), SessionError> {
        let state = self.state();
        if state != expected {
            return Err(SessionError::InvalidState {
                session: self.id(),
                action,
                state,
            });
        }
        Ok(())
    }

    /// Exclusive access to the store connection for one document call
    ///
    /// Fails with a `kind` storage error once the transaction has ended, so an
    /// operation that leaked its session cannot write outside the transaction.
    pub(crate) async fn connection(
        &self,
        kind: StorageErrorKind,
    ) -> Result<MutexGuard<'_, libsql::Connection>, StorageError> {
        if !self.is_active() {
            return Err(StorageError::new(
                kind,
                format!(
                    "session {} has no active transaction (state: {})",
                    self.id(),
                    self.state()
                ),
            ));
        }
        let guard = self.inner.conn.lock().await;
        // Re-check: the engine may have ended the transaction while we waited
        if !self.is_active() {
            return Err(StorageError::new(
                kind,
                format!("session {} ended while waiting for the connection", self.id()),
            ));
        }
        Ok(guard)
    }

    /// Begin a transaction; only valid on an idle session
    pub(crate) async fn start_transaction(&self) -> Result<(), SessionError> {
        self.require(SessionState::Idle, "start a transaction")?;
        let conn = self.inner.conn.lock().await;
        self.inner
            .driver
            .begin(&conn)
            .await
            .map_err(|source| SessionError::Store {
                session: self.id(),
                action: "start transaction",
                source,
            })?;
        self.set_state(SessionState::Active);
        tracing::debug!(session = %self.id(), "transaction started");
        Ok(())
    }

    /// Commit the active transaction
    ///
    /// On failure the session stays active so the caller can still abort.
    pub(crate) async fn commit(&self) -> Result<(), SessionError> {
        self.require(SessionState::Active, "commit")?;
        let conn = self.inner.conn.lock().await;
        self.inner
            .driver
            .commit(&conn)
            .await
            .map_err(|source| SessionError::Store {
                session: self.id(),
                action: "commit",
                source,
            })?;
        self.set_state(SessionState::Committed);
        drop(conn);
        self.release_writer();
        tracing::debug!(session = %self.id(), "transaction committed");
        Ok(())
    }

    /// Roll back the active transaction
    ///
    /// The session is released whether or not the store acknowledges the
    /// rollback; an unacknowledged transaction dies with the connection.
    pub(crate) async fn abort(&self) -> Result<(), SessionError> {
        self.require(SessionState::Active, "abort")?;
        let conn = self.inner.conn.lock().await;
        // Mark first so operations still queued on the mutex see the abort
        self.set_state(SessionState::Aborted);
        let rolled_back = self.inner.driver.rollback(&conn).await;
        drop(conn);
        self.release_writer();
        rolled_back.map_err(|source| SessionError::Store {
            session: self.id(),
            action: "abort",
            source,
        })?;
        tracing::debug!(session = %self.id(), "transaction aborted");
        Ok(())
    }
}
