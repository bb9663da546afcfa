//! Database Layer
//!
//! This module handles the connection to the embedded libsql document store:
//!
//! - Connection lifecycle: connect-and-ping, disconnect
//! - Collection provisioning with atomic batched index creation
//! - Session-scoped document access (insert, find, update, delete, count)
//!
//! # Architecture
//!
//! Every collection is a table of JSON documents keyed by `_id`; the store's
//! own ACID transactions provide the atomicity that
//! [`transaction`](crate::transaction) builds on.

mod collection;
mod connection;
mod error;
mod storage_error;

pub use collection::{Collection, Filter, IndexKey, IndexModel, InsertOneResult, SortOrder, ID_FIELD};
pub(crate) use connection::ConnectionShared;
pub use connection::Connection;
pub use error::DatabaseError;
pub use storage_error::{StorageError, StorageErrorKind};
