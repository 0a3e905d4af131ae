//! Short lived memoization of upstream token introspection.
//!
//! One cache serves both Google id tokens and access tokens; the token kind is
//! part of the key. A single async mutex covers the whole lookup-or-fetch
//! sequence, so concurrent misses for a token cost one upstream call. Misses
//! for unrelated tokens wait behind it as well.

use crate::clock::Clock;
use crate::federation::{fetch_json, ProviderError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Upper bound on how long an introspection result is trusted.
pub const CACHE_CEILING: i64 = 15 * 60;

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    IdToken,
    AccessToken,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdToken => "id_token",
            Self::AccessToken => "access_token",
        }
    }
}

/// Decoded introspection response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenInfo(pub Map<String, Value>);

impl TokenInfo {
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer field, also accepting the quoted form Google uses.
    #[must_use]
    pub fn int_field(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn exp(&self) -> Option<i64> {
        self.int_field("exp")
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.str_field("email").filter(|e| !e.is_empty())
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.str_field("name").filter(|n| !n.is_empty())
    }

    /// `aud` for id tokens, `azp` or `aud` for access tokens.
    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        self.str_field("aud").or_else(|| self.str_field("azp"))
    }
}

pub type IntrospectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TokenInfo, ProviderError>> + Send + 'a>>;

pub trait Introspector: Send + Sync {
    fn introspect<'a>(&'a self, kind: TokenKind, token: &'a str) -> IntrospectFuture<'a>;
}

/// Google `tokeninfo` endpoint.
#[derive(Debug, Clone)]
pub struct GoogleTokenInfo {
    http: reqwest::Client,
    url: String,
}

impl GoogleTokenInfo {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_url(http, GOOGLE_TOKENINFO_URL)
    }

    #[must_use]
    pub fn with_url(http: reqwest::Client, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }
}

impl Introspector for GoogleTokenInfo {
    fn introspect<'a>(&'a self, kind: TokenKind, token: &'a str) -> IntrospectFuture<'a> {
        Box::pin(async move {
            let request = self.http.get(&self.url).query(&[(kind.as_str(), token)]);
            fetch_json("google", request).await
        })
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: TokenInfo,
    expired_at: i64,
}

pub struct VerificationCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    introspector: Arc<dyn Introspector>,
    clock: Arc<dyn Clock>,
    ceiling: i64,
}

impl VerificationCache {
    #[must_use]
    pub fn new(introspector: Arc<dyn Introspector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            introspector,
            clock,
            ceiling: CACHE_CEILING,
        }
    }

    #[must_use]
    pub const fn with_ceiling(mut self, ceiling: i64) -> Self {
        self.ceiling = ceiling;
        self
    }

    fn cache_key(kind: TokenKind, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Return the cached introspection of `token`, fetching it on a miss.
    /// Failed lookups and tokens already past their `exp` are not cached.
    ///
    /// # Errors
    ///
    /// Returns the introspector's error on a miss.
    #[instrument(skip(self, token))]
    pub async fn lookup(&self, kind: TokenKind, token: &str) -> Result<TokenInfo, ProviderError> {
        let key = Self::cache_key(kind, token);
        let mut entries = self.entries.lock().await;

        let now = self.clock.now();
        if let Some(entry) = entries.get(&key) {
            if entry.expired_at > now {
                debug!("verification cache hit");
                return Ok(entry.data.clone());
            }
        }

        let data = self.introspector.introspect(kind, token).await?;
        let ceiling = now + self.ceiling;
        let expired_at = data.exp().map_or(ceiling, |exp| exp.min(ceiling));
        entries.retain(|_, entry| entry.expired_at > now);
        if expired_at > now {
            entries.insert(
                key,
                CacheEntry {
                    data: data.clone(),
                    expired_at,
                },
            );
        }
        debug!(entries = entries.len(), "verification cache miss");
        Ok(data)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
