//! Collections of JSON documents
//!
//! A [`Collection`] is a named table of JSON documents keyed by `_id`. Writes
//! and reads that belong to a transaction take the operation's [`Session`];
//! `count_documents` and `list_index_names` run outside any transaction and
//! only observe committed state.
//!
//! # Storage layout
//!
//! ```text
//! "<database>__<collection>" (
//!     id   TEXT PRIMARY KEY,   -- JSON encoding of the document's _id
//!     body TEXT NOT NULL        -- the whole document, _id included
//! )
//! ```
//!
//! Secondary indexes are expression indexes over `json_extract(body, ...)`.

use crate::db::connection::ConnectionShared;
use crate::db::error::DatabaseError;
use crate::db::storage_error::{StorageError, StorageErrorKind};
use crate::transaction::Session;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Primary key field of every document
pub const ID_FIELD: &str = "_id";

/// Key direction within an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            SortOrder::Ascending => "1",
            SortOrder::Descending => "-1",
        }
    }
}

/// One field of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    pub order: SortOrder,
}

/// Index specification for [`Connection::collection`](crate::db::Connection::collection)
///
/// An index with no keys is invalid and fails the whole provisioning call.
///
/// ```rust
/// use docstore_core::db::{IndexModel, SortOrder};
///
/// let by_email = IndexModel::ascending("email").unique(true);
/// assert_eq!(by_email.index_name(), "email_1");
///
/// let by_owner_date = IndexModel::new()
///     .key("owner", SortOrder::Ascending)
///     .key("created", SortOrder::Descending);
/// assert_eq!(by_owner_date.index_name(), "owner_1_created_-1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexModel {
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub name: Option<String>,
}

impl IndexModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single ascending key
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new().key(field, SortOrder::Ascending)
    }

    pub fn key(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            order,
        });
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit name, or `field_1_other_-1` derived from the keys
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.order.suffix()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.keys.is_empty() {
            return Err("index keys cannot be empty".to_string());
        }
        for key in &self.keys {
            if !is_valid_field(&key.field) {
                return Err(format!("invalid index field '{}'", key.field));
            }
        }
        if let Some(name) = &self.name {
            if name.is_empty() || name.contains('"') {
                return Err(format!("invalid index name '{}'", name));
            }
        }
        Ok(())
    }
}

/// Field names end up inside quoted SQL literals and JSON paths
fn is_valid_field(field: &str) -> bool {
    !field.is_empty()
        && !field.starts_with('$')
        && !field
            .chars()
            .any(|c| c == '"' || c == '\'' || c.is_control())
}

/// JSON path of a top-level field
fn field_path(field: &str) -> String {
    format!("'$.\"{}\"'", field)
}

/// SQL expression reading `field` out of a document
fn field_expr(field: &str) -> String {
    if field == ID_FIELD {
        "id".to_string()
    } else {
        format!("json_extract(body, {})", field_path(field))
    }
}

/// SQL expression naming the JSON type of `field`
fn field_type(field: &str) -> String {
    format!("json_type(body, {})", field_path(field))
}

/// Equality filter over top-level document fields
///
/// ```rust
/// use docstore_core::db::Filter;
/// use serde_json::json;
///
/// let active_admins = Filter::all().eq("role", "admin").eq("active", true);
/// let one = Filter::by_id(json!("user-1"));
/// # let _ = (active_admins, one);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::all().eq(ID_FIELD, id)
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// `WHERE` clause (including the keyword) and its positional parameters
    fn to_sql(&self, kind: StorageErrorKind) -> Result<(String, Vec<libsql::Value>), StorageError> {
        if self.conditions.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut params = Vec::with_capacity(self.conditions.len());

        for (field, value) in &self.conditions {
            if !is_valid_field(field) {
                return Err(StorageError::new(
                    kind,
                    format!("invalid filter field '{}'", field),
                ));
            }
            let expr = field_expr(field);

            if field == ID_FIELD {
                clauses.push(format!("{} = ?", expr));
                params.push(libsql::Value::Text(id_key(value)?));
                continue;
            }

            match value {
                Value::Null => clauses.push(format!("{} IS NULL", expr)),
                // json_extract yields 1/0 for booleans, so the JSON type keeps
                // `true` and `1` apart
                Value::Bool(b) => {
                    clauses.push(format!("{} = ?", field_type(field)));
                    params.push(libsql::Value::Text(b.to_string()));
                }
                Value::Number(n) => {
                    clauses.push(format!(
                        "({} = ? AND {} IN ('integer', 'real'))",
                        expr,
                        field_type(field)
                    ));
                    match n.as_i64() {
                        Some(i) => params.push(libsql::Value::Integer(i)),
                        None => params.push(libsql::Value::Real(n.as_f64().unwrap_or(f64::NAN))),
                    }
                }
                Value::String(s) => {
                    clauses.push(format!("{} = ?", expr));
                    params.push(libsql::Value::Text(s.clone()));
                }
                Value::Array(_) | Value::Object(_) => {
                    clauses.push(format!("{} = json(?)", expr));
                    params.push(libsql::Value::Text(value.to_string()));
                }
            }
        }

        Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
    }
}

/// Result of [`Collection::insert_one`]
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

/// Primary-key encoding of an `_id` value
fn id_key(id: &Value) -> Result<String, StorageError> {
    match id {
        Value::String(_) | Value::Number(_) => Ok(id.to_string()),
        other => Err(StorageError::convert(format!(
            "_id must be a string or number, got {}",
            other
        ))),
    }
}

fn as_document(value: Value, kind: StorageErrorKind) -> Result<Map<String, Value>, StorageError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::new(
            kind,
            format!("document must be a JSON object, got {}", other),
        )),
    }
}

/// Handle to one collection; cheap to clone into operation closures
#[derive(Clone)]
pub struct Collection {
    shared: Arc<ConnectionShared>,
    name: String,
    table: String,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("database", &self.shared.database())
            .field("name", &self.name)
            .finish()
    }
}

impl Collection {
    pub(crate) fn new(shared: Arc<ConnectionShared>, name: String) -> Self {
        let table = shared.table_name(&name);
        Self {
            shared,
            name,
            table,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn sql_index_name(&self, index: &IndexModel) -> String {
        format!("{}__{}", self.table, index.index_name())
    }

    /// Create the backing table and `indexes` on `conn`
    ///
    /// Runs inside the caller's provisioning transaction.
    pub(crate) async fn provision(
        &self,
        conn: &libsql::Connection,
        indexes: &[IndexModel],
    ) -> Result<(), DatabaseError> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    id TEXT PRIMARY KEY NOT NULL,
                    body TEXT NOT NULL CHECK (json_valid(body))
                )",
                self.table
            ),
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::provisioning_failed(
                &self.name,
                format!("Failed to create collection table: {}", e),
            )
        })?;

        for index in indexes {
            let columns = index
                .keys
                .iter()
                .map(|k| format!("{} {}", field_expr(&k.field), k.order.sql()))
                .collect::<Vec<_>>()
                .join(", ");

            let sql = format!(
                "CREATE {}INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({})",
                if index.unique { "UNIQUE " } else { "" },
                self.sql_index_name(index),
                self.table,
                columns
            );

            conn.execute(&sql, ()).await.map_err(|e| {
                DatabaseError::provisioning_failed(
                    &self.name,
                    format!("Failed to create index '{}': {}", index.index_name(), e),
                )
            })?;
        }

        Ok(())
    }

    /// Insert `document` inside the session's transaction
    ///
    /// A missing `_id` is filled with a generated UUID. Inserting an `_id`
    /// that already exists fails with a duplicate-key [`StorageError`].
    pub async fn insert_one(
        &self,
        session: &Session,
        document: Value,
    ) -> Result<InsertOneResult, StorageError> {
        let mut document = as_document(document, StorageErrorKind::Insert)?;
        let inserted_id = document
            .entry(ID_FIELD)
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
            .clone();

        let key = id_key(&inserted_id)?;
        let body = serde_json::to_string(&document)
            .map_err(|e| StorageError::convert(format!("could not encode document: {}", e)))?;

        let conn = session.connection(StorageErrorKind::Insert).await?;
        conn.execute(
            &format!("INSERT INTO \"{}\" (id, body) VALUES (?1, ?2)", self.table),
            (key.clone(), body),
        )
        .await
        .map_err(|e| {
            StorageError::with_source(
                StorageErrorKind::Insert,
                format!("document {} into '{}': {}", key, self.name, e),
                e,
            )
        })?;

        tracing::trace!(session = %session.id(), collection = %self.name, id = %key, "document inserted");
        Ok(InsertOneResult { inserted_id })
    }

    /// First document matching `filter`, as seen by the session's transaction
    pub async fn find_one(
        &self,
        session: &Session,
        filter: &Filter,
    ) -> Result<Option<Value>, StorageError> {
        let (where_clause, params) = filter.to_sql(StorageErrorKind::Find)?;
        let sql = format!("SELECT body FROM \"{}\"{} LIMIT 1", self.table, where_clause);

        let conn = session.connection(StorageErrorKind::Find).await?;
        let mut rows = conn
            .query(&sql, libsql::params::Params::Positional(params))
            .await
            .map_err(|e| {
                StorageError::with_source(StorageErrorKind::Find, format!("in '{}'", self.name), e)
            })?;

        let row = rows.next().await.map_err(|e| {
            StorageError::with_source(StorageErrorKind::Find, format!("in '{}'", self.name), e)
        })?;

        match row {
            None => Ok(None),
            Some(row) => {
                let body: String = row.get(0).map_err(|e| {
                    StorageError::with_source(StorageErrorKind::Convert, "document body", e)
                })?;
                let document = serde_json::from_str(&body).map_err(|e| {
                    StorageError::convert(format!("stored document is not valid JSON: {}", e))
                })?;
                Ok(Some(document))
            }
        }
    }

    /// Merge `patch` into the first document matching `filter`
    ///
    /// Uses JSON merge-patch semantics: `null` members delete fields. `_id`
    /// cannot be changed. Returns the number of documents modified (0 or 1).
    pub async fn update_one(
        &self,
        session: &Session,
        filter: &Filter,
        patch: Value,
    ) -> Result<u64, StorageError> {
        let patch = as_document(patch, StorageErrorKind::Update)?;
        if patch.contains_key(ID_FIELD) {
            return Err(StorageError::update("_id cannot be modified"));
        }

        let (where_clause, mut params) = filter.to_sql(StorageErrorKind::Update)?;
        let sql = format!(
            "UPDATE \"{table}\" SET body = json_patch(body, ?) WHERE id = (SELECT id FROM \"{table}\"{where_clause} LIMIT 1)",
            table = self.table,
            where_clause = where_clause
        );
        params.insert(0, libsql::Value::Text(Value::Object(patch).to_string()));

        let conn = session.connection(StorageErrorKind::Update).await?;
        conn.execute(&sql, libsql::params::Params::Positional(params))
            .await
            .map_err(|e| {
                StorageError::with_source(
                    StorageErrorKind::Update,
                    format!("in '{}': {}", self.name, e),
                    e,
                )
            })
    }

    /// Delete every document matching `filter`; returns how many were removed
    pub async fn delete_many(&self, session: &Session, filter: &Filter) -> Result<u64, StorageError> {
        let (where_clause, params) = filter.to_sql(StorageErrorKind::Delete)?;
        let sql = format!("DELETE FROM \"{}\"{}", self.table, where_clause);

        let conn = session.connection(StorageErrorKind::Delete).await?;
        conn.execute(&sql, libsql::params::Params::Positional(params))
            .await
            .map_err(|e| {
                StorageError::with_source(
                    StorageErrorKind::Delete,
                    format!("in '{}': {}", self.name, e),
                    e,
                )
            })
    }

    /// Count matching documents inside the session's transaction, including
    /// its own uncommitted writes
    pub async fn count_in(&self, session: &Session, filter: &Filter) -> Result<u64, StorageError> {
        let conn = session.connection(StorageErrorKind::Find).await?;
        self.count_with(&conn, filter).await
    }

    /// Count committed documents matching `filter`
    pub async fn count_documents(&self, filter: &Filter) -> Result<u64, StorageError> {
        let conn = self
            .shared
            .open()
            .await
            .map_err(|e| StorageError::find(e.to_string()))?;
        self.count_with(&conn, filter).await
    }

    async fn count_with(&self, conn: &libsql::Connection, filter: &Filter) -> Result<u64, StorageError> {
        let (where_clause, params) = filter.to_sql(StorageErrorKind::Find)?;
        let sql = format!("SELECT COUNT(*) FROM \"{}\"{}", self.table, where_clause);

        let mut rows = conn
            .query(&sql, libsql::params::Params::Positional(params))
            .await
            .map_err(|e| {
                StorageError::with_source(StorageErrorKind::Find, format!("count in '{}'", self.name), e)
            })?;
        let row = rows
            .next()
            .await
            .map_err(|e| {
                StorageError::with_source(StorageErrorKind::Find, format!("count in '{}'", self.name), e)
            })?
            .ok_or_else(|| StorageError::find("COUNT(*) returned no rows"))?;
        let count: i64 = row
            .get(0)
            .map_err(|e| StorageError::with_source(StorageErrorKind::Convert, "count", e))?;
        Ok(count as u64)
    }

    /// Names of the secondary indexes on this collection, sorted
    pub async fn list_index_names(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.shared.open().await?;
        let prefix = format!("{}__", self.table);

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
                [self.table.clone()],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to list indexes: {}", e)))?;

        let mut names = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let name: String = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(e.to_string()))?;
            names.push(name.strip_prefix(&prefix).unwrap_or(&name).to_string());
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_name_defaults() {
        assert_eq!(IndexModel::ascending("some field").index_name(), "some field_1");
        assert_eq!(
            IndexModel::ascending("a")
                .key("b", SortOrder::Descending)
                .index_name(),
            "a_1_b_-1"
        );
        assert_eq!(IndexModel::ascending("a").named("by_a").index_name(), "by_a");
    }

    #[test]
    fn test_index_validation() {
        assert_eq!(
            IndexModel::new().validate().unwrap_err(),
            "index keys cannot be empty"
        );
        assert!(IndexModel::ascending("ok").validate().is_ok());
        assert!(IndexModel::ascending("bad'field").validate().is_err());
        assert!(IndexModel::ascending("$where").validate().is_err());
        assert!(IndexModel::ascending("x").named("").validate().is_err());
    }

    #[test]
    fn test_filter_sql() {
        let (sql, params) = Filter::all().to_sql(StorageErrorKind::Find).unwrap();
        assert!(sql.is_empty());
        assert!(params.is_empty());

        let (sql, params) = Filter::by_id("a")
            .eq("age", 30)
            .eq("active", true)
            .eq("deleted", Value::Null)
            .to_sql(StorageErrorKind::Find)
            .unwrap();
        assert_eq!(
            sql,
            " WHERE id = ? \
             AND (json_extract(body, '$.\"age\"') = ? AND json_type(body, '$.\"age\"') IN ('integer', 'real')) \
             AND json_type(body, '$.\"active\"') = ? \
             AND json_extract(body, '$.\"deleted\"') IS NULL"
        );
        assert_eq!(
            params,
            vec![
                libsql::Value::Text("\"a\"".to_string()),
                libsql::Value::Integer(30),
                libsql::Value::Text("true".to_string())
            ]
        );
    }

    #[test]
    fn test_filter_rejects_bad_fields_and_ids() {
        let err = Filter::all()
            .eq("x'", 1)
            .to_sql(StorageErrorKind::Delete)
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Delete);

        let err = Filter::by_id(json!({"nested": true}))
            .to_sql(StorageErrorKind::Find)
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Convert);
    }

    #[test]
    fn test_id_key_distinguishes_types() {
        assert_eq!(id_key(&json!("1")).unwrap(), "\"1\"");
        assert_eq!(id_key(&json!(1)).unwrap(), "1");
        assert!(id_key(&json!(null)).is_err());
    }
}
