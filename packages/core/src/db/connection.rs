//! Connection Management
//!
//! [`Connection`] owns the libsql database handle for one logical database.
//! It provisions collections, hands out sessions to transaction coordinators,
//! and is torn down with an explicit [`Connection::disconnect`].
//!
//! # Logical databases
//!
//! A single store file can hold several logical databases. Collection `c` of
//! database `d` lives in the table `"d__c"`, so two connections opened with
//! different `database` names never see each other's collections. Names are
//! lowercase and never contain the `__` separator, so no two (database,
//! collection) pairs map onto the same table.
//!
//! # Writers
//!
//! SQLite allows one writer per file, and libsql waits for a held write lock
//! by blocking the calling thread. Sessions and collection provisioning on one
//! connection therefore queue on an async writer lock before `BEGIN IMMEDIATE`,
//! so a waiting transaction never stalls the runtime thread its peer needs to
//! finish.
//!
//! # Examples
//!
//! ```rust,no_run
//! use docstore_core::{Connection, StoreConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connection = Connection::connect(StoreConfig::new("./data/app.db", "app")).await?;
//!     let accounts = connection.collection("accounts", vec![]).await?;
//!
//!     let debit = accounts.clone();
//!     let credit = accounts.clone();
//!     connection
//!         .new_transaction()
//!         .new_operation(move |session| async move {
//!             debit.insert_one(&session, json!({"_id": "a", "balance": 90})).await?;
//!             Ok(())
//!         })
//!         .new_operation(move |session| async move {
//!             credit.insert_one(&session, json!({"_id": "b", "balance": 110})).await?;
//!             Ok(())
//!         })
//!         .execute()
//!         .await?;
//!
//!     connection.disconnect().await?;
//!     Ok(())
//! }
//! ```

use crate::config::{is_valid_identifier, StoreConfig};
use crate::db::collection::{Collection, IndexModel};
use crate::db::error::DatabaseError;
use crate::transaction::{Session, SqlTransactionDriver, TransactionCoordinator, TransactionDriver};
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// State shared between a connection and the handles it gives out
pub(crate) struct ConnectionShared {
    database: String,
    path: PathBuf,
    busy_timeout: Duration,
    transaction_timeout: Option<Duration>,
    driver: Arc<dyn TransactionDriver>,
    /// `None` once disconnected
    store: RwLock<Option<Arc<Database>>>,
    /// Held from session start until commit or abort
    writer: Arc<Mutex<()>>,
}

impl ConnectionShared {
    pub(crate) fn database(&self) -> &str {
        &self.database
    }

    pub(crate) fn transaction_timeout(&self) -> Option<Duration> {
        self.transaction_timeout
    }

    /// Table backing collection `name`
    pub(crate) fn table_name(&self, name: &str) -> String {
        format!("{}__{}", self.database, name)
    }

    /// Open a store connection with the busy timeout configured
    ///
    /// Fails with [`DatabaseError::Disconnected`] after `disconnect`.
    pub(crate) async fn open(&self) -> Result<libsql::Connection, DatabaseError> {
        let store = {
            let guard = self.store.read().await;
            guard
                .as_ref()
                .cloned()
                .ok_or_else(|| DatabaseError::disconnected(&self.database))?
        };

        let conn = store
            .connect()
            .map_err(|e| DatabaseError::connection_failed(self.path.clone(), e))?;

        // PRAGMA statements return rows, so they go through query()
        let pragma = format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis());
        conn.query(&pragma, ())
            .await
            .map_err(|e| DatabaseError::connection_failed(self.path.clone(), e))?;

        Ok(conn)
    }

    /// Wait for this connection's write turn
    pub(crate) async fn lock_writer(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.writer).lock_owned().await
    }

    /// Fresh session for one transaction attempt
    ///
    /// Waits until no other session of this connection is in a transaction.
    pub(crate) async fn start_session(&self) -> Result<Session, DatabaseError> {
        let writer = self.lock_writer().await;
        let conn = self.open().await?;
        let session = Session::new(conn, Arc::clone(&self.driver), Some(writer));
        tracing::debug!(session = %session.id(), database = %self.database, "session acquired");
        Ok(session)
    }
}

/// Connection to one logical database of the backing store
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.shared.database)
            .field("path", &self.shared.path)
            .finish()
    }
}

impl Connection {
    /// Open the store and verify it responds
    ///
    /// This will:
    /// 1. Validate the configuration
    /// 2. Ensure the parent directory exists (create if needed)
    /// 3. Open the database file
    /// 4. Ping it (`SELECT 1`) and enable WAL journaling
    ///
    /// # Errors
    ///
    /// Returns a connection-category [`DatabaseError`] if any step fails.
    pub async fn connect(config: StoreConfig) -> Result<Self, DatabaseError> {
        Self::connect_with_driver(config, Arc::new(SqlTransactionDriver)).await
    }

    /// Like [`connect`](Self::connect), with a custom transaction driver for
    /// every session of this connection
    pub async fn connect_with_driver(
        config: StoreConfig,
        driver: Arc<dyn TransactionDriver>,
    ) -> Result<Self, DatabaseError> {
        config.validate().map_err(DatabaseError::InvalidConfig)?;

        let path = config.path.clone();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Builder::new_local(&path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(path.clone(), e))?;

        let shared = Arc::new(ConnectionShared {
            database: config.database.clone(),
            path: path.clone(),
            busy_timeout: config.busy_timeout(),
            transaction_timeout: config.transaction_timeout(),
            driver,
            store: RwLock::new(Some(Arc::new(store))),
            writer: Arc::new(Mutex::new(())),
        });

        let conn = shared.open().await?;
        Self::ping(&conn, &path).await?;

        // WAL lets verification reads proceed while a session holds the write lock
        conn.query("PRAGMA journal_mode = WAL", ())
            .await
            .map_err(|e| DatabaseError::ping_failed(path.clone(), e))?;

        tracing::info!(
            database = %config.database,
            path = %path.display(),
            "connected to document store"
        );

        Ok(Self { shared })
    }

    async fn ping(conn: &libsql::Connection, path: &std::path::Path) -> Result<(), DatabaseError> {
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::ping_failed(path.to_path_buf(), e))?;
        rows.next()
            .await
            .map_err(|e| DatabaseError::ping_failed(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Logical database name
    pub fn database(&self) -> &str {
        self.shared.database()
    }

    pub fn path(&self) -> &std::path::Path {
        &self.shared.path
    }

    /// Get or create collection `name`, provisioning `indexes` on it
    ///
    /// All index specifications are validated before the store is touched;
    /// creation then runs as one store transaction. Either every index exists
    /// afterwards or none of them was created.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::InvalidCollectionName`] for names that cannot be mapped
    /// - [`DatabaseError::InvalidIndex`] for an index with no keys or a bad field
    /// - [`DatabaseError::ProvisioningFailed`] if the store rejects the batch
    pub async fn collection(
        &self,
        name: &str,
        indexes: Vec<IndexModel>,
    ) -> Result<Collection, DatabaseError> {
        if !is_valid_identifier(name) {
            return Err(DatabaseError::InvalidCollectionName {
                name: name.to_string(),
            });
        }

        for (position, index) in indexes.iter().enumerate() {
            index
                .validate()
                .map_err(|reason| DatabaseError::invalid_index(name, position, reason))?;
        }

        let collection = Collection::new(Arc::clone(&self.shared), name.to_string());
        let _writer = self.shared.lock_writer().await;
        let conn = self.shared.open().await?;

        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            DatabaseError::provisioning_failed(name, format!("Failed to begin: {}", e))
        })?;

        if let Err(e) = collection.provision(&conn, &indexes).await {
            if let Err(rollback_err) = conn.execute("ROLLBACK", ()).await {
                tracing::warn!(collection = %name, "rollback after failed provisioning failed: {}", rollback_err);
            }
            return Err(e);
        }

        conn.execute("COMMIT", ()).await.map_err(|e| {
            DatabaseError::provisioning_failed(name, format!("Failed to commit: {}", e))
        })?;

        tracing::debug!(collection = %name, indexes = indexes.len(), "collection provisioned");
        Ok(collection)
    }

    /// Names of this database's collections, sorted
    pub async fn list_collection_names(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.shared.open().await?;
        let prefix = self.shared.table_name("");

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND substr(name, 1, ?1) = ?2 ORDER BY name",
                (prefix.len() as i64, prefix.clone()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to list collections: {}", e))
            })?;

        let mut names = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let table: String = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(e.to_string()))?;
            names.push(table[prefix.len()..].to_string());
        }
        Ok(names)
    }

    /// Start building a transaction against this connection
    ///
    /// The coordinator inherits the connection's default transaction timeout.
    pub fn new_transaction(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::clone(&self.shared))
    }

    /// Close the connection
    ///
    /// Sessions already handed out finish their current transaction; new
    /// sessions, collection calls and coordinators fail afterwards.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::Disconnected`] if the connection was already closed.
    pub async fn disconnect(&self) -> Result<(), DatabaseError> {
        let mut store = self.shared.store.write().await;
        if store.take().is_none() {
            return Err(DatabaseError::disconnected(&self.shared.database));
        }
        tracing::info!(database = %self.shared.database, "disconnected from document store");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.store.read().await.is_some()
    }
}
