//! Maps sessions onto the persistence collaborator.

use crate::storage::{Entity, PersistenceEnvelope, Repository, Store, StoreError};
use crate::token::{SessionClaims, TokenType};
use std::sync::Arc;

/// Stored view of a session: routing attributes plus the last issued token.
/// The session itself is only recoverable by decrypting the token payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    envelope: PersistenceEnvelope,
    token_type: TokenType,
    channel: String,
    app_id: String,
    user_id: String,
    expiry: i64,
    token: String,
}

impl SessionRecord {
    #[must_use]
    pub fn from_claims(claims: &SessionClaims, token: String) -> Self {
        let mut record = Self {
            envelope: PersistenceEnvelope::new(claims.jti.as_str()),
            token_type: claims.token_type,
            channel: String::new(),
            app_id: String::new(),
            user_id: String::new(),
            expiry: 0,
            token: String::new(),
        };
        record.update(claims, token);
        record
    }

    /// Point the record at a newly issued token for the same session.
    pub fn update(&mut self, claims: &SessionClaims, token: String) {
        self.token_type = claims.token_type;
        self.channel.clone_from(&claims.sub);
        self.app_id.clone_from(&claims.aud);
        self.user_id.clone_from(&claims.uid);
        self.expiry = claims.exp;
        self.token = token;
    }

    #[must_use]
    pub const fn token_type(&self) -> TokenType {
        self.token_type
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub const fn expiry(&self) -> i64 {
        self.expiry
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub const fn is_expired(&self, now: i64) -> bool {
        self.expiry > 0 && self.expiry < now
    }
}

impl Entity for SessionRecord {
    fn envelope(&self) -> &PersistenceEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut PersistenceEnvelope {
        &mut self.envelope
    }

    fn write_fields(&mut self) -> Result<(), StoreError> {
        let envelope = &mut self.envelope;
        envelope.set_attr("type", self.token_type.as_str());
        envelope.set_attr("channel", self.channel.as_str());
        envelope.set_attr("app_id", self.app_id.as_str());
        envelope.set_attr("user_id", self.user_id.as_str());
        envelope.set_attr("expiry", self.expiry);
        envelope.set_attr("token", self.token.as_str());
        Ok(())
    }

    fn from_envelope(envelope: PersistenceEnvelope) -> Result<Self, StoreError> {
        let token_type = envelope
            .attr_str("type")
            .and_then(TokenType::parse)
            .ok_or_else(|| StoreError::Invalid(format!("session {} has no type", envelope.id())))?;
        let text = |key: &str| envelope.attr_str(key).unwrap_or_default().to_string();
        let channel = text("channel");
        let app_id = text("app_id");
        let user_id = text("user_id");
        let token = text("token");
        let expiry = envelope.attr_i64("expiry").unwrap_or_default();
        Ok(Self {
            envelope,
            token_type,
            channel,
            app_id,
            user_id,
            expiry,
            token,
        })
    }
}

#[derive(Clone)]
pub struct SessionStore {
    records: Repository<SessionRecord>,
}

impl SessionStore {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            records: Repository::new(store),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.records.get(id).await
    }

    /// Overwrites any existing record with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn save(&self, record: &mut SessionRecord) -> Result<(), StoreError> {
        self.records.save(record).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, record: &SessionRecord) -> Result<bool, StoreError> {
        self.records.delete(record).await
    }
}
