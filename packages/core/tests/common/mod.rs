//! Shared helpers for integration tests
#![allow(dead_code)]

use anyhow::Result;
use docstore_core::db::Collection;
use docstore_core::{Connection, StoreConfig};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Install a fmt subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Fresh store in a temp directory, connected to database "test-db"
pub async fn create_test_connection() -> Result<(Connection, TempDir)> {
    init_tracing();
    let temp_dir = TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("test.db"), "test-db");
    let connection = Connection::connect(config).await?;
    Ok((connection, temp_dir))
}

/// Connection plus an empty "test-data" collection
pub async fn create_test_collection() -> Result<(Connection, Collection, TempDir)> {
    let (connection, temp_dir) = create_test_connection().await?;
    let collection = connection.collection("test-data", vec![]).await?;
    Ok((connection, collection, temp_dir))
}

/// Invocation counter shared with operation closures
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Document with a known `_id`
pub fn doc(id: impl Into<Value>) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("_id".to_string(), id.into());
    Value::Object(map)
}
