//! Document-level storage errors
//!
//! Collection calls report failures as a [`StorageError`] whose kind says which
//! kind of access failed. Operations usually bubble these up with `?`; the
//! transaction engine treats them as opaque operation errors.

use thiserror::Error;

/// Which document access failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Convert,
    Insert,
    Delete,
    Update,
    Find,
    Unknown,
}

impl StorageErrorKind {
    fn describe(self) -> &'static str {
        match self {
            StorageErrorKind::Convert => "could not convert value",
            StorageErrorKind::Insert => "could not insert value",
            StorageErrorKind::Delete => "could not delete value",
            StorageErrorKind::Update => "could not update value",
            StorageErrorKind::Find => "could not find value",
            StorageErrorKind::Unknown => "unknown error",
        }
    }
}

/// Error returned by [`Collection`](crate::db::Collection) document calls
#[derive(Error, Debug)]
#[error("{}: {message}", .kind.describe())]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
    #[source]
    source: Option<libsql::Error>,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn with_source(
        kind: StorageErrorKind,
        message: impl Into<String>,
        source: libsql::Error,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn convert(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Convert, message)
    }

    pub fn insert(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Insert, message)
    }

    pub fn delete(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Delete, message)
    }

    pub fn update(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Update, message)
    }

    pub fn find(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Find, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Unknown, message)
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Uniqueness violation on `_id` or a unique index
    pub fn is_duplicate_key(&self) -> bool {
        let needle = "UNIQUE constraint failed";
        self.message.contains(needle)
            || self
                .source
                .as_ref()
                .is_some_and(|e| e.to_string().contains(needle))
    }
}
