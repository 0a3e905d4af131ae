use super::{PersistenceEnvelope, Store, StoreError, StoreFuture};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store, read-after-write consistent per key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, PersistenceEnvelope>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Store for MemoryStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<PersistenceEnvelope>> {
        Box::pin(async move { Ok(self.records.read().await.get(id).cloned()) })
    }

    fn create<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            if records.contains_key(record.id()) {
                return Err(StoreError::Conflict(record.id().to_string()));
            }
            records.insert(record.id().to_string(), record.clone());
            Ok(())
        })
    }

    fn save<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.records
                .write()
                .await
                .insert(record.id().to_string(), record.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.records.write().await.remove(record.id()).is_some()) })
    }

    fn find_by_attr<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> StoreFuture<'a, Vec<PersistenceEnvelope>> {
        Box::pin(async move {
            let mut found: Vec<_> = self
                .records
                .read()
                .await
                .values()
                .filter(|record| record.attr_str(key) == Some(value))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.id().cmp(b.id()));
            Ok(found)
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_conflicts_save_overwrites() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let mut record = PersistenceEnvelope::new("s1");
        record.set_attr("type", "pre_login");
        record.sync();

        store.create(&record).await?;
        assert!(matches!(
            store.create(&record).await,
            Err(StoreError::Conflict(id)) if id == "s1"
        ));

        record.set_attr("type", "login");
        record.sync();
        store.save(&record).await?;
        let stored = store.get("s1").await?;
        assert_eq!(
            stored.as_ref().and_then(|r| r.attr_str("type")),
            Some("login")
        );
        assert_eq!(store.len().await, 1);

        assert!(store.delete(&record).await?);
        assert!(!store.delete(&record).await?);
        assert!(store.get("s1").await?.is_none());
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn find_by_attr_matches_strings_only() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        for (id, owner) in [("b", "alice"), ("a", "alice"), ("c", "bob")] {
            let mut record = PersistenceEnvelope::new(id);
            record.set_attr("owner_id", owner);
            store.save(&record).await?;
        }
        let mut numeric = PersistenceEnvelope::new("d");
        numeric.set_attr("owner_id", 1);
        store.save(&numeric).await?;

        let ids: Vec<_> = store
            .find_by_attr("owner_id", "alice")
            .await?
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(store.find_by_attr("owner_id", "1").await?.is_empty());
        assert!(store.find_by_attr("missing", "alice").await?.is_empty());
        Ok(())
    }
}
