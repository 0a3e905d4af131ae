//! Local user accounts, keyed by normalized email.

use crate::storage::{Entity, PersistenceEnvelope, Repository, Store, StoreError};
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const AES_KEY_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid email: {0}")]
    InvalidEmail(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

fn generate_aes_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AES_KEY_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    envelope: PersistenceEnvelope,
    aes_key: String,
    display_name: String,
}

impl User {
    /// New account with a freshly generated payload key.
    #[must_use]
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            envelope: PersistenceEnvelope::new(id),
            aes_key: generate_aes_key(),
            display_name: display_name.to_string(),
        }
    }

    #[must_use]
    pub fn aes_key(&self) -> &str {
        &self.aes_key
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl Entity for User {
    fn envelope(&self) -> &PersistenceEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut PersistenceEnvelope {
        &mut self.envelope
    }

    fn write_fields(&mut self) -> Result<(), StoreError> {
        self.envelope.set_attr("aes_key", self.aes_key.as_str());
        self.envelope
            .set_attr("display_name", self.display_name.as_str());
        Ok(())
    }

    fn from_envelope(envelope: PersistenceEnvelope) -> Result<Self, StoreError> {
        let aes_key = envelope
            .attr_str("aes_key")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StoreError::Invalid(format!("user {} has no aes_key", envelope.id())))?
            .to_string();
        let display_name = envelope
            .attr_str("display_name")
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            envelope,
            aes_key,
            display_name,
        })
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    users: Repository<User>,
}

impl UserDirectory {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            users: Repository::new(store),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.users.get(&normalize_email(id)).await
    }

    /// Find the account for `email`, creating it on first sight.
    ///
    /// Two providers asserting the same new email at once may both try to
    /// create it; the loser of that race reads back the winner's record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEmail` for malformed addresses.
    pub async fn resolve_or_create(
        &self,
        email: &str,
        display_name: &str,
    ) -> Result<User, UserError> {
        let id = normalize_email(email);
        if !valid_email(&id) {
            return Err(UserError::InvalidEmail(email.to_string()));
        }

        if let Some(user) = self.users.get(&id).await? {
            debug!("user {} already exists", id);
            return Ok(user);
        }

        let mut user = User::new(&id, display_name);
        match self.users.create(&mut user).await {
            Ok(()) => {
                info!("created user {}", id);
                Ok(user)
            }
            Err(StoreError::Conflict(_)) => {
                debug!("user {} was created concurrently", id);
                self.users
                    .get(&id)
                    .await?
                    .ok_or_else(|| UserError::Storage(StoreError::Conflict(id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoreFuture};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@b.com"));
        assert!(!valid_email("a@b"));
        assert!(!valid_email("a b@c.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn generated_keys_are_alphanumeric() {
        let key = generate_aes_key();
        assert_eq!(key.len(), AES_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_aes_key());
    }

    #[tokio::test]
    async fn creates_user_once() -> Result<(), UserError> {
        let store = Arc::new(MemoryStore::new());
        let directory = UserDirectory::new(store.clone());

        let first = directory.resolve_or_create("A@B.com", "Alice").await?;
        let second = directory.resolve_or_create("a@b.com", "Someone else").await?;

        assert_eq!(first.id(), "a@b.com");
        assert_eq!(first.aes_key(), second.aes_key());
        assert_eq!(second.display_name(), "Alice");
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_invalid_email() {
        let directory = UserDirectory::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            directory.resolve_or_create("not-an-email", "x").await,
            Err(UserError::InvalidEmail(_))
        ));
    }

    /// Hides records from the first `get` to reproduce a lost creation race.
    struct RacyStore {
        inner: MemoryStore,
        hidden: AtomicBool,
    }

    impl Store for RacyStore {
        fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<PersistenceEnvelope>> {
            if self.hidden.swap(false, Ordering::SeqCst) {
                return Box::pin(async { Ok(None) });
            }
            self.inner.get(id)
        }

        fn create<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()> {
            self.inner.create(record)
        }

        fn save<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()> {
            self.inner.save(record)
        }

        fn delete<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, bool> {
            self.inner.delete(record)
        }

        fn find_by_attr<'a>(
            &'a self,
            key: &'a str,
            value: &'a str,
        ) -> StoreFuture<'a, Vec<PersistenceEnvelope>> {
            self.inner.find_by_attr(key, value)
        }

        fn backend(&self) -> &'static str {
            "racy"
        }
    }

    #[tokio::test]
    async fn lost_creation_race_reads_back_winner() -> Result<(), UserError> {
        let store = Arc::new(RacyStore {
            inner: MemoryStore::new(),
            hidden: AtomicBool::new(false),
        });
        let directory = UserDirectory::new(store.clone());
        let winner = directory.resolve_or_create("a@b.com", "Winner").await?;

        store.hidden.store(true, Ordering::SeqCst);
        let loser = directory.resolve_or_create("a@b.com", "Loser").await?;

        assert_eq!(loser.aes_key(), winner.aes_key());
        assert_eq!(loser.display_name(), "Winner");
        Ok(())
    }
}
