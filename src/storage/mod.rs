//! Persistence collaborator.
//!
//! Entities are stored as a [`PersistenceEnvelope`]: an id, an opaque checksum,
//! timestamps, indexed attributes and a JSON document. Backends only see
//! envelopes; entities own one by composition and map their fields in and out.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::{future::Future, marker::PhantomData, pin::Pin, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("storage backend error")]
    Backend(#[from] sqlx::Error),
    #[error("invalid record encoding")]
    Codec(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    Invalid(String),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Keyed record storage. `create` fails with `Conflict` when the id is taken,
/// `save` overwrites.
pub trait Store: Send + Sync {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<PersistenceEnvelope>>;
    fn create<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()>;
    fn save<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()>;
    fn delete<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, bool>;
    /// Records whose string attribute `key` equals `value`, ordered by id.
    fn find_by_attr<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> StoreFuture<'a, Vec<PersistenceEnvelope>>;
    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceEnvelope {
    id: String,
    checksum: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    attrs: Map<String, Value>,
    data: Value,
}

impl PersistenceEnvelope {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            checksum: String::new(),
            created_at: now,
            updated_at: now,
            attrs: Map::new(),
            data: Value::Null,
        }
    }

    /// Rebuild an envelope read back from a backend.
    #[must_use]
    pub const fn from_parts(
        id: String,
        checksum: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        attrs: Map<String, Value>,
        data: Value,
    ) -> Self {
        Self {
            id,
            checksum,
            created_at,
            updated_at,
            attrs,
            data,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub const fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attrs.get(key).and_then(Value::as_i64)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(key.into(), value.into());
    }

    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    fn compute_checksum(&self) -> String {
        // serde_json maps are ordered, so this encoding is canonical
        let doc = json!({ "id": self.id, "attrs": self.attrs, "data": self.data });
        format!("{:x}", Sha256::digest(doc.to_string().as_bytes()))
    }

    /// Refresh the checksum, bumping `updated_at` when the content changed.
    /// Returns whether it changed.
    pub fn sync(&mut self) -> bool {
        let checksum = self.compute_checksum();
        if checksum == self.checksum {
            return false;
        }
        self.checksum = checksum;
        self.updated_at = Utc::now();
        true
    }
}

/// An entity persisted through an envelope.
pub trait Entity: Sized {
    fn envelope(&self) -> &PersistenceEnvelope;

    fn envelope_mut(&mut self) -> &mut PersistenceEnvelope;

    /// Copy typed fields into the envelope.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if a field cannot be encoded.
    fn write_fields(&mut self) -> Result<(), StoreError>;

    /// Rebuild the entity from a stored envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope lacks required fields.
    fn from_envelope(envelope: PersistenceEnvelope) -> Result<Self, StoreError>;

    fn id(&self) -> &str {
        self.envelope().id()
    }

    /// Write fields and refresh the checksum.
    ///
    /// # Errors
    ///
    /// Propagates `write_fields` failures.
    fn sync(&mut self) -> Result<bool, StoreError> {
        self.write_fields()?;
        Ok(self.envelope_mut().sync())
    }
}

/// Typed access to a [`Store`] holding one kind of entity.
pub struct Repository<T> {
    store: Arc<dyn Store>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails or the record cannot be decoded.
    pub async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(id).await? {
            Some(envelope) => T::from_envelope(envelope).map(Some),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns `Conflict` if the id already exists.
    pub async fn create(&self, entity: &mut T) -> Result<(), StoreError> {
        entity.sync()?;
        self.store.create(entity.envelope()).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn save(&self, entity: &mut T) -> Result<(), StoreError> {
        entity.sync()?;
        self.store.save(entity.envelope()).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, entity: &T) -> Result<bool, StoreError> {
        self.store.delete(entity.envelope()).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails or a record cannot be decoded.
    pub async fn find_by_attr(&self, key: &str, value: &str) -> Result<Vec<T>, StoreError> {
        self.store
            .find_by_attr(key, value)
            .await?
            .into_iter()
            .map(T::from_envelope)
            .collect()
    }
}
