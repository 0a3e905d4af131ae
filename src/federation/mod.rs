//! Federated identity: provider adapters and the reconciliation that turns a
//! provider profile into a local login.

pub mod client;
mod error;
pub mod facebook;
pub mod github;
pub mod google;
pub mod linkedin;
pub mod reconcile;
pub mod worker;

pub use client::{http_client, Credentials};
pub(crate) use client::fetch_json;
pub use error::ProviderError;
pub use reconcile::{ReconcileError, Reconciler};
pub use worker::WorkerPool;

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

/// Provider credentials as carried in `Session.data` between the login
/// request and reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ProviderToken {
    #[must_use]
    pub fn bearer(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            token_type: "bearer".to_string(),
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// # Errors
    ///
    /// Returns an error if `bytes` is not a serialized token.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub email: String,
    pub display_name: String,
}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// One third-party identity provider.
pub trait IdentityProvider: Send + Sync {
    /// Channel name used in tokens and app configuration.
    fn channel(&self) -> &'static str;

    fn client_id(&self) -> &str;

    /// Trade the code returned by the OAuth redirect for provider credentials.
    fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, ProviderToken>;

    fn fetch_profile<'a>(&'a self, token: &'a ProviderToken) -> ProviderFuture<'a, ProviderProfile>;
}

/// Configured providers keyed by channel.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.channel(), provider);
    }

    #[must_use]
    pub fn get(&self, channel: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(channel).cloned()
    }

    #[must_use]
    pub fn client_id(&self, channel: &str) -> Option<String> {
        self.providers.get(channel).map(|p| p.client_id().to_string())
    }

    pub fn channels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.providers.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.channels()).finish()
    }
}
