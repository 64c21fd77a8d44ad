/// Document store capability
///
/// Services talk to a [`Db`] handle, which wraps one of two backends behind
/// the [`DocumentStore`] trait:
///
/// - [`memory::MemoryStore`]: process-local, used by tests and when no
///   database URL is configured
/// - [`postgres::PostgresStore`]: JSONB documents in PostgreSQL via sqlx
///
/// Every read and write happens inside a [`Session`]. A session that is
/// dropped without [`Session::commit`] rolls back, so multi-document effects
/// (claiming a job and inserting its successor) are all-or-nothing.
///
/// # Modules
///
/// - `query`: filter, update and index definitions
/// - `document`: in-process evaluation of the query algebra
/// - `collection`: typed collection wrapper with primary-key injection
/// - `pagination`: cursor-based connections
/// - `pool` / `migrations`: PostgreSQL connection management
///
/// # Example
///
/// ```
/// use warden_shared::db::{query::Filter, Db};
/// use warden_shared::id::IdGenerator;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let db = Db::memory();
/// let notes = db.collection::<serde_json::Value>("notes", IdGenerator::with_prefix("note_"));
///
/// let note = notes.insert_one(serde_json::json!({"title": "hello"})).await?;
/// assert!(note["_id"].as_str().unwrap().starts_with("note_"));
/// assert_eq!(notes.count(&Filter::All).await?, 1);
/// # Ok(())
/// # }
/// ```

pub mod collection;
pub mod document;
pub mod memory;
pub mod migrations;
pub mod pagination;
pub mod pool;
pub mod postgres;
pub mod query;

pub use collection::{Collection, Scoped};
pub use document::Document;

use crate::id::IdGenerator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use query::{Filter, FindOptions, IndexSpec, Update};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write
    #[error("Duplicate key on index {index}")]
    DuplicateKey { index: String },

    /// The document or update is structurally invalid
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The store has been closed
    #[error("Store is closed")]
    Closed,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the write was rejected by the unique index `index`
    pub fn is_duplicate_key(&self, index: &str) -> bool {
        matches!(self, StoreError::DuplicateKey { index: name } if name == index)
    }
}

/// Name of the implicit primary-key index
pub const PRIMARY_KEY_INDEX: &str = "_id_";

/// A unit of work against the store
#[async_trait]
pub trait Session: Send {
    async fn find_one(&mut self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError>;

    async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Inserts a document, which must carry an `_id`
    async fn insert_one(&mut self, collection: &str, document: Document) -> Result<(), StoreError>;

    /// Updates the first match and returns it as modified
    ///
    /// With `upsert`, a missing match inserts a document seeded from the
    /// filter's equality fields; the update must provide its `_id`.
    async fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Document>, StoreError>;

    async fn delete_many(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Backend capable of opening sessions
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn Session>, StoreError>;

    /// Creates or replaces an index; fails if existing documents violate it
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    /// Deletes documents whose TTL index timestamp has expired at `now`
    async fn purge_expired(&self, collection: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn close(&self);
}

/// Handle to a document store
///
/// Cheap to clone. Construct one per process (or per test) and pass it to
/// the services that need it.
#[derive(Clone)]
pub struct Db {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    /// Fresh, empty in-memory store
    pub fn memory() -> Self {
        Self::from_store(Arc::new(memory::MemoryStore::new()))
    }

    /// Connects to PostgreSQL and runs pending migrations
    pub async fn connect(config: pool::DatabaseConfig) -> Result<Self, StoreError> {
        let store = postgres::PostgresStore::connect(config).await?;
        Ok(Self::from_store(Arc::new(store)))
    }

    /// PostgreSQL when `database_url` is set, memory otherwise
    pub async fn open(database_url: Option<&str>, max_connections: u32) -> Result<Self, StoreError> {
        match database_url {
            Some(url) if !url.is_empty() => {
                Self::connect(pool::DatabaseConfig {
                    url: url.to_string(),
                    max_connections,
                    ..Default::default()
                })
                .await
            }
            _ => {
                tracing::warn!("No database URL configured, using the in-memory document store");
                Ok(Self::memory())
            }
        }
    }

    pub fn from_store(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn begin(&self) -> Result<Box<dyn Session>, StoreError> {
        self.store.begin().await
    }

    /// Typed view of a collection
    pub fn collection<T>(&self, name: impl Into<String>, ids: IdGenerator) -> Collection<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        Collection::new(self.clone(), name.into(), ids)
    }

    pub async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.store.create_index(collection, index).await
    }

    pub async fn purge_expired(&self, collection: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.store.purge_expired(collection, now).await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    /// Releases the underlying connections; later calls fail with `Closed`
    pub async fn close(&self) {
        self.store.close().await
    }
}
