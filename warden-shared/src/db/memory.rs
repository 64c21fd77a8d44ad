//! In-memory document store
//!
//! All sessions are serialized by a single async mutex, which makes every
//! session behave like a serializable transaction. The first write in a
//! session snapshots the state; dropping the session uncommitted restores it.
//!
//! A session holds the lock for its whole lifetime. Never open a second
//! session (or call an auto-committing collection method) while one is
//! alive in the same task.

use super::document::{self, Document};
use super::query::{Filter, FindOptions, IndexSpec, Update};
use super::{DocumentStore, Session, StoreError, PRIMARY_KEY_INDEX};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryCollection {
    /// Documents keyed by `_id`
    docs: BTreeMap<String, Document>,
    indexes: Vec<IndexSpec>,
}

impl MemoryCollection {
    /// Checks `doc` against every unique index, ignoring the document itself
    fn check_unique(&self, id: &str, doc: &Document) -> Result<(), StoreError> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let keys = document::index_keys(doc, index);
            if keys.is_empty() {
                continue;
            }

            let conflict = self
                .docs
                .iter()
                .filter(|(other_id, _)| other_id.as_str() != id)
                .any(|(_, other)| !document::index_keys(other, index).is_disjoint(&keys));

            if conflict {
                return Err(StoreError::DuplicateKey {
                    index: index.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Document> + 'a {
        self.docs.values().filter(move |doc| document::matches(doc, filter))
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: HashMap<String, MemoryCollection>,
    closed: bool,
}

/// Process-local document store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemorySession {
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
    committed: bool,
}

impl MemorySession {
    fn collection(&self, name: &str) -> Option<&MemoryCollection> {
        self.guard.collections.get(name)
    }

    fn collection_mut(&mut self, name: &str) -> &mut MemoryCollection {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.guard.clone());
        }
        self.guard.collections.entry(name.to_string()).or_default()
    }

    fn write(&mut self, collection: &str, id: String, doc: Document) -> Result<(), StoreError> {
        let target = self.collection_mut(collection);
        target.check_unique(&id, &doc)?;
        target.docs.insert(id, doc);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(snapshot) = self.snapshot.take() {
                *self.guard = snapshot;
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn find_one(&mut self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        Ok(self
            .collection(collection)
            .and_then(|c| c.matching(filter).next().cloned()))
    }

    async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let Some(source) = self.collection(collection) else {
            return Ok(Vec::new());
        };

        let mut docs: Vec<Document> = source.matching(filter).cloned().collect();
        if !options.sort.is_empty() {
            docs.sort_by(|a, b| document::compare_by(a, b, &options.sort));
        }
        if let Some(limit) = options.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self
            .collection(collection)
            .map(|c| c.matching(filter).count() as u64)
            .unwrap_or(0))
    }

    async fn insert_one(&mut self, collection: &str, document: Document) -> Result<(), StoreError> {
        let id = document::document_id(&document)
            .ok_or_else(|| StoreError::InvalidDocument("document has no _id".to_string()))?
            .to_string();

        if self
            .collection(collection)
            .is_some_and(|c| c.docs.contains_key(&id))
        {
            return Err(StoreError::DuplicateKey {
                index: PRIMARY_KEY_INDEX.to_string(),
            });
        }

        self.write(collection, id, document)
    }

    async fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Document>, StoreError> {
        let existing = self
            .collection(collection)
            .and_then(|c| c.matching(filter).next().cloned());

        match existing {
            Some(mut doc) => {
                let id = document::document_id(&doc).unwrap_or_default().to_string();
                document::apply_update(&mut doc, update, false)?;
                if document::document_id(&doc) != Some(id.as_str()) {
                    return Err(StoreError::InvalidDocument("_id is immutable".to_string()));
                }
                self.write(collection, id, doc.clone())?;
                Ok(Some(doc))
            }
            None if upsert => {
                let mut doc = document::seed_from_filter(filter)?;
                document::apply_update(&mut doc, update, true)?;
                self.insert_one(collection, doc.clone()).await?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn delete_many(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let doomed: Vec<String> = match self.collection(collection) {
            Some(c) => c
                .docs
                .iter()
                .filter(|(_, doc)| document::matches(doc, filter))
                .map(|(id, _)| id.clone())
                .collect(),
            None => return Ok(0),
        };

        if doomed.is_empty() {
            return Ok(0);
        }

        let target = self.collection_mut(collection);
        for id in &doomed {
            target.docs.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.committed = true;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Session>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        if guard.closed {
            return Err(StoreError::Closed);
        }
        Ok(Box::new(MemorySession {
            guard,
            snapshot: None,
            committed: false,
        }))
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }

        let target = state.collections.entry(collection.to_string()).or_default();
        let mut candidate = target.clone();
        candidate.indexes.retain(|existing| existing.name != index.name);
        candidate.indexes.push(index.clone());

        for (id, doc) in &candidate.docs {
            candidate.check_unique(id, doc)?;
        }

        *target = candidate;
        Ok(())
    }

    async fn purge_expired(&self, collection: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }

        let Some(target) = state.collections.get_mut(collection) else {
            return Ok(0);
        };

        let ttl_indexes: Vec<(String, i64)> = target
            .indexes
            .iter()
            .filter_map(|index| {
                let ttl = index.expire_after?;
                let key = index.keys.first()?;
                Some((key.clone(), ttl.as_millis() as i64))
            })
            .collect();

        let now_ms = now.timestamp_millis();
        let before = target.docs.len();
        target.docs.retain(|_, doc| {
            !ttl_indexes.iter().any(|(key, ttl_ms)| {
                document::get_path(doc, key)
                    .and_then(Value::as_i64)
                    .is_some_and(|stamp| stamp + ttl_ms <= now_ms)
            })
        });

        Ok((before - target.docs.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.state.lock().await.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().await.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::SortDirection;
    use serde_json::json;
    use std::time::Duration;

    async fn insert(store: &MemoryStore, doc: Value) -> Result<(), StoreError> {
        let mut session = store.begin().await?;
        session.insert_one("items", doc).await?;
        session.commit().await
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryStore::new();
        insert(&store, json!({"_id": "a", "n": 2})).await.unwrap();
        insert(&store, json!({"_id": "b", "n": 1})).await.unwrap();

        let mut session = store.begin().await.unwrap();
        let options = FindOptions {
            sort: vec![("n".to_string(), SortDirection::Ascending)],
            limit: Some(1),
        };
        let docs = session.find("items", &Filter::All, &options).await.unwrap();
        assert_eq!(docs, vec![json!({"_id": "b", "n": 1})]);
        assert_eq!(session.count("items", &Filter::gt("n", 0)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_primary_key() {
        let store = MemoryStore::new();
        insert(&store, json!({"_id": "a"})).await.unwrap();
        let err = insert(&store, json!({"_id": "a"})).await.unwrap_err();
        assert!(err.is_duplicate_key(PRIMARY_KEY_INDEX));
    }

    #[tokio::test]
    async fn test_insert_requires_id() {
        let store = MemoryStore::new();
        let err = insert(&store, json!({"n": 1})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_unique_sparse_index_across_documents() {
        let store = MemoryStore::new();
        let index = IndexSpec::new("unique-email-address", "emails.address").unique().sparse();
        store.create_index("items", &index).await.unwrap();

        insert(&store, json!({"_id": "a", "emails": [{"address": "x@example.com"}]})).await.unwrap();
        insert(&store, json!({"_id": "b"})).await.unwrap();
        insert(&store, json!({"_id": "c"})).await.unwrap();

        let err = insert(&store, json!({"_id": "d", "emails": [{"address": "x@example.com"}]}))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key("unique-email-address"));
    }

    #[tokio::test]
    async fn test_create_index_rejects_existing_duplicates() {
        let store = MemoryStore::new();
        insert(&store, json!({"_id": "a", "handle": "x"})).await.unwrap();
        insert(&store, json!({"_id": "b", "handle": "x"})).await.unwrap();

        let index = IndexSpec::new("unique-handle", "handle").unique();
        assert!(store.create_index("items", &index).await.is_err());
    }

    #[tokio::test]
    async fn test_uncommitted_session_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut session = store.begin().await.unwrap();
            session.insert_one("items", json!({"_id": "a"})).await.unwrap();
        }

        let mut session = store.begin().await.unwrap();
        assert_eq!(session.count("items", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_one_and_update_and_upsert() {
        let store = MemoryStore::new();
        insert(&store, json!({"_id": "a", "n": 1})).await.unwrap();

        let mut session = store.begin().await.unwrap();
        let updated = session
            .find_one_and_update("items", &Filter::by_id("a"), &Update::new().set("n", 2), false)
            .await
            .unwrap();
        assert_eq!(updated, Some(json!({"_id": "a", "n": 2})));

        let missing = session
            .find_one_and_update("items", &Filter::by_id("z"), &Update::new().set("n", 3), false)
            .await
            .unwrap();
        assert!(missing.is_none());

        let upserted = session
            .find_one_and_update(
                "items",
                &Filter::eq("name", "job"),
                &Update::new().set("n", 4).set_on_insert("_id", "b"),
                true,
            )
            .await
            .unwrap();
        assert_eq!(upserted, Some(json!({"_id": "b", "name": "job", "n": 4})));
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_id_is_immutable() {
        let store = MemoryStore::new();
        insert(&store, json!({"_id": "a"})).await.unwrap();

        let mut session = store.begin().await.unwrap();
        let result = session
            .find_one_and_update("items", &Filter::by_id("a"), &Update::new().set("_id", "b"), false)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        let index = IndexSpec::new("job-ttl", "started").expire_after(Duration::from_secs(300));
        store.create_index("items", &index).await.unwrap();

        let now = Utc::now();
        let old = now.timestamp_millis() - 301_000;
        insert(&store, json!({"_id": "old", "started": old})).await.unwrap();
        insert(&store, json!({"_id": "fresh", "started": now.timestamp_millis()})).await.unwrap();
        insert(&store, json!({"_id": "pending"})).await.unwrap();

        assert_eq!(store.purge_expired("items", now).await.unwrap(), 1);

        let mut session = store.begin().await.unwrap();
        assert_eq!(session.count("items", &Filter::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_many() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            insert(&store, json!({"_id": id, "kind": if id == "c" { "keep" } else { "drop" }}))
                .await
                .unwrap();
        }

        let mut session = store.begin().await.unwrap();
        assert_eq!(session.delete_many("items", &Filter::eq("kind", "drop")).await.unwrap(), 2);
        session.commit().await.unwrap();

        let mut session = store.begin().await.unwrap();
        assert_eq!(session.count("items", &Filter::All).await.unwrap(), 1);
    }
}
