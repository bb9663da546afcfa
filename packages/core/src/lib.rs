//! Docstore Core - Atomic Transactions over a Document Store
//!
//! This crate composes any number of independently written store operations
//! into one all-or-nothing unit of work against an embedded libsql document
//! store, run either sequentially or as a concurrent fan-out.
//!
//! # Architecture
//!
//! - **Connection manager**: connect-and-verify, collection provisioning, disconnect
//! - **Session adapter**: one store connection, one transaction at a time
//! - **Operation registry**: fluent builder collecting operation closures
//! - **Execution engine**: runs the closures, commits only if all succeed
//!
//! # Modules
//!
//! - [`config`] - Store configuration (serde, environment)
//! - [`db`] - Connection, collections, documents
//! - [`transaction`] - Sessions, operations, coordinator
//!
//! # Examples
//!
//! ```rust,no_run
//! use docstore_core::{Connection, StoreConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connection = Connection::connect(StoreConfig::from_env()).await?;
//!     let orders = connection.collection("orders", vec![]).await?;
//!
//!     let (first, second) = (orders.clone(), orders.clone());
//!     connection
//!         .new_transaction()
//!         .new_operation(move |session| async move {
//!             first.insert_one(&session, json!({"_id": 1, "item": "book"})).await?;
//!             Ok(())
//!         })
//!         .new_operation(move |session| async move {
//!             second.insert_one(&session, json!({"_id": 2, "item": "pen"})).await?;
//!             Ok(())
//!         })
//!         .execute_concurrent()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod transaction;

// Re-export commonly used types
pub use config::StoreConfig;
pub use db::{Collection, Connection, DatabaseError, Filter, IndexModel, StorageError};
pub use transaction::{
    CancellationToken, OperationError, Session, TransactionCoordinator, TransactionError,
};
