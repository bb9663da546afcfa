//! Database Error Types
//!
//! This module defines error types for the connection manager: connecting,
//! provisioning collections, and disconnecting.

use std::path::PathBuf;
use thiserror::Error;

/// Connection manager errors
///
/// Variants fall into three categories, exposed through
/// [`is_connection_error`](Self::is_connection_error),
/// [`is_provisioning_error`](Self::is_provisioning_error) and
/// [`Disconnected`](Self::Disconnected).
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Configuration rejected before touching the store
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    /// Failed to open the store
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Store opened but the liveness probe failed
    #[error("Could not ping database at {path}: {source}")]
    PingFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// Collection name cannot be mapped onto the store
    #[error("Invalid collection name '{name}'")]
    InvalidCollectionName { name: String },

    /// Index specification rejected before any index was created
    #[error("Could not create indexes on '{collection}': index #{position} is invalid: {reason}")]
    InvalidIndex {
        collection: String,
        position: usize,
        reason: String,
    },

    /// Store rejected the provisioning batch; nothing was created
    #[error("Could not create indexes on '{collection}': {context}")]
    ProvisioningFailed { collection: String, context: String },

    /// The connection was already closed
    #[error("Connection to database '{database}' is already disconnected")]
    Disconnected { database: String },

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create a ping failed error
    pub fn ping_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::PingFailed { path, source }
    }

    /// Create an invalid index error
    pub fn invalid_index(
        collection: impl Into<String>,
        position: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidIndex {
            collection: collection.into(),
            position,
            reason: reason.into(),
        }
    }

    /// Create a provisioning failed error
    pub fn provisioning_failed(collection: impl Into<String>, context: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            collection: collection.into(),
            context: context.into(),
        }
    }

    /// Create a disconnected error
    pub fn disconnected(database: impl Into<String>) -> Self {
        Self::Disconnected {
            database: database.into(),
        }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Store unreachable or misconfigured
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::ConnectionFailed { .. }
                | Self::PingFailed { .. }
                | Self::DirectoryCreationFailed(_)
        )
    }

    /// Bad collection or index specification, or a store rejection while provisioning
    pub fn is_provisioning_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCollectionName { .. }
                | Self::InvalidIndex { .. }
                | Self::ProvisioningFailed { .. }
        )
    }
}
