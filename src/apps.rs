//! Client applications allowed to request logins.

use crate::storage::{Entity, PersistenceEnvelope, Repository, Store, StoreError};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::info;
use url::{ParseError, Url};

pub const SYSTEM_APP_ID: &str = "exter";
pub const SYSTEM_ADMIN_ID: &str = "admin@local";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AppData {
    #[serde(default)]
    description: String,
    #[serde(default)]
    identity_sources: BTreeMap<String, bool>,
    #[serde(default)]
    tags: Vec<String>,
    /// PEM key the app may use to receive encrypted data
    #[serde(default)]
    rsa_public_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct App {
    envelope: PersistenceEnvelope,
    owner_id: String,
    is_active: bool,
    default_return_url: String,
    data: AppData,
}

impl App {
    #[must_use]
    pub fn new(id: &str, owner_id: &str) -> Self {
        Self {
            envelope: PersistenceEnvelope::new(id),
            owner_id: owner_id.to_string(),
            is_active: true,
            default_return_url: String::new(),
            data: AppData::default(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.data.description = description.to_string();
        self
    }

    #[must_use]
    pub fn with_default_return_url(mut self, url: &str) -> Self {
        self.default_return_url = url.to_string();
        self
    }

    #[must_use]
    pub fn with_identity_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data.identity_sources = sources.into_iter().map(|s| (s.into(), true)).collect();
        self
    }

    /// Replace the source flags as given, disabled entries included.
    #[must_use]
    pub fn with_source_flags(mut self, flags: BTreeMap<String, bool>) -> Self {
        self.data.identity_sources = flags;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.data.tags = tags;
        self
    }

    #[must_use]
    pub fn with_rsa_public_key(mut self, pem: &str) -> Self {
        self.data.rsa_public_key = pem.to_string();
        self
    }

    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.data.description
    }

    #[must_use]
    pub fn default_return_url(&self) -> &str {
        &self.default_return_url
    }

    #[must_use]
    pub const fn identity_sources(&self) -> &BTreeMap<String, bool> {
        &self.data.identity_sources
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.data.tags
    }

    #[must_use]
    pub fn rsa_public_key(&self) -> &str {
        &self.data.rsa_public_key
    }

    #[must_use]
    pub fn is_source_enabled(&self, source: &str) -> bool {
        self.data
            .identity_sources
            .get(source)
            .copied()
            .unwrap_or(false)
    }

    /// Resolve the url a client is sent back to after login.
    ///
    /// An empty `preferred` falls back to the default url, which may itself be
    /// empty. A relative
    /// `preferred` is joined onto the default url's origin. An absolute one must
    /// share the default url's host. When the default url is itself relative
    /// only relative urls are accepted.
    #[must_use]
    pub fn generate_return_url(&self, preferred: &str) -> Option<String> {
        let preferred = preferred.trim();
        if preferred.is_empty() {
            return Some(self.default_return_url.clone());
        }

        let preferred_url = match Url::parse(preferred) {
            Ok(url) => Some(url),
            Err(ParseError::RelativeUrlWithoutBase) => None,
            Err(_) => return None,
        };

        let Some(default_url) = Url::parse(&self.default_return_url)
            .ok()
            .filter(|u| u.has_host())
        else {
            return preferred_url.is_none().then(|| preferred.to_string());
        };

        match preferred_url {
            None => Some(format!(
                "{}/{}",
                default_url.origin().ascii_serialization(),
                preferred.trim_start_matches('/')
            )),
            Some(url) if url.host_str() == default_url.host_str() => Some(preferred.to_string()),
            Some(_) => None,
        }
    }
}

impl Entity for App {
    fn envelope(&self) -> &PersistenceEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut PersistenceEnvelope {
        &mut self.envelope
    }

    fn write_fields(&mut self) -> Result<(), StoreError> {
        self.envelope.set_attr("owner_id", self.owner_id.as_str());
        self.envelope.set_attr("is_active", self.is_active);
        self.envelope
            .set_attr("default_return_url", self.default_return_url.as_str());
        self.envelope.set_data(serde_json::to_value(&self.data)?);
        Ok(())
    }

    fn from_envelope(envelope: PersistenceEnvelope) -> Result<Self, StoreError> {
        let data = if envelope.data().is_null() {
            AppData::default()
        } else {
            serde_json::from_value(envelope.data().clone())?
        };
        Ok(Self {
            owner_id: envelope.attr_str("owner_id").unwrap_or_default().to_string(),
            is_active: envelope
                .attr("is_active")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            default_return_url: envelope
                .attr_str("default_return_url")
                .unwrap_or_default()
                .to_string(),
            data,
            envelope,
        })
    }
}

#[derive(Clone)]
pub struct AppRegistry {
    apps: Repository<App>,
}

impl AppRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            apps: Repository::new(store),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get(&self, id: &str) -> Result<Option<App>, StoreError> {
        self.apps.get(id).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn save(&self, app: &mut App) -> Result<(), StoreError> {
        self.apps.save(app).await
    }

    /// # Errors
    ///
    /// Returns `Conflict` if an app with the same id exists.
    pub async fn create(&self, app: &mut App) -> Result<(), StoreError> {
        self.apps.create(app).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, app: &App) -> Result<bool, StoreError> {
        self.apps.delete(app).await
    }

    /// Apps registered by `owner_id`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn owned_by(&self, owner_id: &str) -> Result<Vec<App>, StoreError> {
        self.apps.find_by_attr("owner_id", owner_id).await
    }

    /// Create the system application when missing and keep its login
    /// channels in line with the configured ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn ensure_system_app(&self, channels: &[String]) -> Result<App, StoreError> {
        let mut app = match self.apps.get(SYSTEM_APP_ID).await? {
            Some(app) => app,
            None => {
                info!("creating system app {}", SYSTEM_APP_ID);
                App::new(SYSTEM_APP_ID, SYSTEM_ADMIN_ID).with_description("System application")
            }
        };
        app = app
            .with_active(true)
            .with_identity_sources(channels.iter().cloned());
        self.apps.save(&mut app).await?;
        Ok(app)
    }
}
