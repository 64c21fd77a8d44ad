//! Typed collection wrapper
//!
//! [`Collection`] is the repository every service talks to. It serializes
//! `T` to and from documents, assigns prefixed primary keys on insert and
//! upsert, and materializes pagination connections (see
//! [`super::pagination`]).
//!
//! Methods on `Collection` run in their own session and commit on success.
//! To group several operations atomically, open a session with
//! [`Db::begin`] and use [`Collection::in_session`].

use super::query::{Filter, FindOptions, IndexSpec, Update};
use super::{Db, Document, Session, StoreError};
use crate::id::IdGenerator;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::marker::PhantomData;

/// Typed view of one collection
pub struct Collection<T> {
    db: Db,
    name: String,
    ids: IdGenerator,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            name: self.name.clone(),
            ids: self.ids.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("prefix", &self.ids.prefix())
            .finish()
    }
}

pub(crate) fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(doc)?)
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub(crate) fn new(db: Db, name: String, ids: IdGenerator) -> Self {
        Self {
            db,
            name,
            ids,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Fresh primary key with this collection's prefix
    pub fn new_id(&self) -> String {
        self.ids.generate()
    }

    /// Binds this collection to an open session
    pub fn in_session<'a>(&'a self, session: &'a mut dyn Session) -> Scoped<'a, T> {
        Scoped {
            collection: self,
            session,
        }
    }

    pub async fn find_one(&self, filter: &Filter) -> Result<Option<T>, StoreError> {
        let mut session = self.db.begin().await?;
        let found = self.in_session(session.as_mut()).find_one(filter).await?;
        session.commit().await?;
        Ok(found)
    }

    pub async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<T>, StoreError> {
        let mut session = self.db.begin().await?;
        let found = self.in_session(session.as_mut()).find(filter, options).await?;
        session.commit().await?;
        Ok(found)
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut session = self.db.begin().await?;
        let total = self.in_session(session.as_mut()).count(filter).await?;
        session.commit().await?;
        Ok(total)
    }

    /// Inserts `value`, assigning an `_id` when it has none
    pub async fn insert_one(&self, value: T) -> Result<T, StoreError> {
        let mut session = self.db.begin().await?;
        let inserted = self.in_session(session.as_mut()).insert_one(value).await?;
        session.commit().await?;
        Ok(inserted)
    }

    /// Updates the first match; `false` when nothing matched
    pub async fn update_one(&self, filter: &Filter, update: &Update) -> Result<bool, StoreError> {
        let mut session = self.db.begin().await?;
        let updated = self.in_session(session.as_mut()).update_one(filter, update).await?;
        session.commit().await?;
        Ok(updated)
    }

    pub async fn find_one_and_update(&self, filter: &Filter, update: &Update) -> Result<Option<T>, StoreError> {
        let mut session = self.db.begin().await?;
        let updated = self
            .in_session(session.as_mut())
            .find_one_and_update(filter, update)
            .await?;
        session.commit().await?;
        Ok(updated)
    }

    /// Updates the first match or inserts a new document with a fresh `_id`
    pub async fn upsert(&self, filter: &Filter, update: &Update) -> Result<T, StoreError> {
        let mut session = self.db.begin().await?;
        let doc = self.in_session(session.as_mut()).upsert(filter, update).await?;
        session.commit().await?;
        Ok(doc)
    }

    pub async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut session = self.db.begin().await?;
        let deleted = self.in_session(session.as_mut()).delete_many(filter).await?;
        session.commit().await?;
        Ok(deleted)
    }

    pub async fn create_index(&self, index: &IndexSpec) -> Result<(), StoreError> {
        self.db.create_index(&self.name, index).await
    }

    /// Deletes documents whose TTL index has expired at `now`
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.db.purge_expired(&self.name, now).await
    }
}

/// A collection bound to a caller-owned session
pub struct Scoped<'a, T> {
    collection: &'a Collection<T>,
    session: &'a mut dyn Session,
}

impl<T> Scoped<'_, T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub(crate) fn session(&mut self) -> &mut dyn Session {
        &mut *self.session
    }

    pub(crate) fn collection(&self) -> &Collection<T> {
        self.collection
    }

    pub async fn find_one(&mut self, filter: &Filter) -> Result<Option<T>, StoreError> {
        let name = &self.collection.name;
        self.session.find_one(name, filter).await?.map(decode).transpose()
    }

    pub async fn find(&mut self, filter: &Filter, options: &FindOptions) -> Result<Vec<T>, StoreError> {
        let name = &self.collection.name;
        self.session
            .find(name, filter, options)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn count(&mut self, filter: &Filter) -> Result<u64, StoreError> {
        self.session.count(&self.collection.name, filter).await
    }

    pub async fn insert_one(&mut self, value: T) -> Result<T, StoreError> {
        let mut doc = serde_json::to_value(&value)?;
        let Some(fields) = doc.as_object_mut() else {
            return Err(StoreError::InvalidDocument("documents must be objects".to_string()));
        };

        let has_id = matches!(fields.get("_id"), Some(Value::String(id)) if !id.is_empty());
        if !has_id {
            fields.insert("_id".to_string(), Value::String(self.collection.new_id()));
        }

        self.session.insert_one(&self.collection.name, doc.clone()).await?;
        decode(doc)
    }

    pub async fn update_one(&mut self, filter: &Filter, update: &Update) -> Result<bool, StoreError> {
        let updated = self
            .session
            .find_one_and_update(&self.collection.name, filter, update, false)
            .await?;
        Ok(updated.is_some())
    }

    pub async fn find_one_and_update(&mut self, filter: &Filter, update: &Update) -> Result<Option<T>, StoreError> {
        self.session
            .find_one_and_update(&self.collection.name, filter, update, false)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn upsert(&mut self, filter: &Filter, update: &Update) -> Result<T, StoreError> {
        let pins_id = filter.equality_fields().iter().any(|(path, _)| *path == "_id");
        let update = if pins_id {
            update.clone()
        } else {
            update.clone().set_on_insert("_id", self.collection.new_id())
        };

        let doc = self
            .session
            .find_one_and_update(&self.collection.name, filter, &update, true)
            .await?
            .ok_or_else(|| StoreError::InvalidDocument("upsert produced no document".to_string()))?;
        decode(doc)
    }

    pub async fn delete_many(&mut self, filter: &Filter) -> Result<u64, StoreError> {
        self.session.delete_many(&self.collection.name, filter).await
    }
}
