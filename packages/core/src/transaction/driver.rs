//! TransactionDriver Trait - Store Transaction Primitives
//!
//! The session adapter never issues store-specific statements itself; it goes
//! through a `TransactionDriver`. The default [`SqlTransactionDriver`] speaks
//! libsql's `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`. Alternative drivers can
//! be installed per connection with
//! [`Connection::connect_with_driver`](crate::db::Connection::connect_with_driver),
//! which is how fault-injection tests exercise commit and abort failures.
//!
//! # Examples
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use docstore_core::transaction::{SqlTransactionDriver, TransactionDriver};
//!
//! /// Logs every commit before delegating to the SQL driver
//! struct AuditedDriver(SqlTransactionDriver);
//!
//! #[async_trait]
//! impl TransactionDriver for AuditedDriver {
//!     async fn begin(&self, conn: &libsql::Connection) -> anyhow::Result<()> {
//!         self.0.begin(conn).await
//!     }
//!
//!     async fn commit(&self, conn: &libsql::Connection) -> anyhow::Result<()> {
//!         tracing::info!("committing");
//!         self.0.commit(conn).await
//!     }
//!
//!     async fn rollback(&self, conn: &libsql::Connection) -> anyhow::Result<()> {
//!         self.0.rollback(conn).await
//!     }
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Store-side transaction control for one session connection
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one driver instance is shared by
/// every session of a connection.
#[async_trait]
pub trait TransactionDriver: Send + Sync {
    /// Open a transactional context on `conn`
    async fn begin(&self, conn: &libsql::Connection) -> Result<()>;

    /// Durably apply everything done since `begin`
    async fn commit(&self, conn: &libsql::Connection) -> Result<()>;

    /// Discard everything done since `begin`
    async fn rollback(&self, conn: &libsql::Connection) -> Result<()>;
}

/// Default driver issuing SQL transaction statements
///
/// `BEGIN IMMEDIATE` takes the write lock up front so two sessions never
/// deadlock upgrading from a read lock; the connection's busy timeout makes a
/// second writer wait instead of failing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlTransactionDriver;

#[async_trait]
impl TransactionDriver for SqlTransactionDriver {
    async fn begin(&self, conn: &libsql::Connection) -> Result<()> {
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .context("Failed to begin transaction")?;
        Ok(())
    }

    async fn commit(&self, conn: &libsql::Connection) -> Result<()> {
        conn.execute("COMMIT", ())
            .await
            .context("Failed to commit transaction")?;
        Ok(())
    }

    async fn rollback(&self, conn: &libsql::Connection) -> Result<()> {
        conn.execute("ROLLBACK", ())
            .await
            .context("Failed to roll back transaction")?;
        Ok(())
    }
}
