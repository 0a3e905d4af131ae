//! Background promotion of pre-login sessions.
//!
//! Every failure ends the attempt. The session stays pending and the client
//! eventually sees it expire; nothing is retried.

use super::{ProviderError, ProviderRegistry, ProviderToken, WorkerPool};
use crate::session::{Denial, IssuedToken, SessionError, SessionManager};
use crate::storage::Entity;
use crate::users::UserError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error("no identity provider configured for {0}")]
    UnknownChannel(String),
    #[error("session carries an unreadable provider token")]
    ProviderToken(#[source] serde_json::Error),
}

#[derive(Clone)]
pub struct Reconciler {
    sessions: Arc<SessionManager>,
    providers: Arc<ProviderRegistry>,
    pool: WorkerPool,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        providers: Arc<ProviderRegistry>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            sessions,
            providers,
            pool,
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Resolve the provider profile behind `session_id` and promote the
    /// session to a login for the matching local user.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is unusable or on another channel,
    /// when the provider call fails, or when the user cannot be resolved.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        session_id: &str,
        channel: &str,
    ) -> Result<IssuedToken, ReconcileError> {
        let (session, _) = self.sessions.load_pre_login(session_id).await?;
        if session.channel != channel {
            return Err(SessionError::NoPermission(Denial::ChannelMismatch).into());
        }
        let provider = self
            .providers
            .get(channel)
            .ok_or_else(|| ReconcileError::UnknownChannel(channel.to_string()))?;

        let token = ProviderToken::from_bytes(&session.data).map_err(ReconcileError::ProviderToken)?;
        let profile = provider.fetch_profile(&token).await?;

        let user = self
            .sessions
            .users()
            .resolve_or_create(&profile.email, &profile.display_name)
            .await?;

        let issued = self
            .sessions
            .promote_to_login(session_id, user.id(), &profile.display_name, &session.data)
            .await?;
        Ok(issued)
    }

    /// Reconcile and log the outcome.
    pub async fn run(&self, session_id: &str, channel: &str) {
        match self.reconcile(session_id, channel).await {
            Ok(issued) => info!(
                session_id,
                user_id = %issued.claims.uid,
                "reconciliation finished"
            ),
            Err(ReconcileError::Session(
                e @ (SessionError::SessionNotFound(_)
                | SessionError::SessionExpired(_)
                | SessionError::NoPermission(_)),
            )) => warn!(session_id, channel, "reconciliation skipped: {e}"),
            Err(e) => error!(session_id, channel, "reconciliation failed: {e}"),
        }
    }

    /// Queue reconciliation on the worker pool. Returns `false` if the pool
    /// no longer accepts work.
    pub fn spawn(&self, session_id: &str, channel: &str) -> bool {
        let reconciler = self.clone();
        let session_id = session_id.to_string();
        let channel = channel.to_string();
        self.pool
            .submit(async move { reconciler.run(&session_id, &channel).await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::federation::ProviderProfile;
    use crate::session::{LoginStatus, SessionConfig, DEFAULT_PRE_LOGIN_TTL};
    use crate::storage::MemoryStore;
    use crate::testing::{StaticProvider, TEST_PRIVATE_KEY_PEM};
    use crate::token::TokenCodec;
    use crate::users::UserDirectory;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        reconciler: Reconciler,
        sessions: Arc<SessionManager>,
        provider: Arc<StaticProvider>,
        clock: Arc<ManualClock>,
    }

    fn fixture(profile: Option<ProviderProfile>) -> Fixture {
        let codec = Arc::new(TokenCodec::from_pem(TEST_PRIVATE_KEY_PEM.as_bytes(), None).unwrap());
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let sessions = Arc::new(
            SessionManager::new(
                codec,
                store.clone(),
                UserDirectory::new(store),
                clock.clone(),
                SessionConfig::default(),
            )
            .unwrap(),
        );
        let provider = Arc::new(StaticProvider::new("github", profile));
        let mut providers = ProviderRegistry::new();
        providers.register(provider.clone());
        Fixture {
            reconciler: Reconciler::new(sessions.clone(), Arc::new(providers), WorkerPool::new(4)),
            sessions,
            provider,
            clock,
        }
    }

    fn octo() -> Option<ProviderProfile> {
        Some(ProviderProfile {
            email: "Octo@Example.com".into(),
            display_name: "Octo Cat".into(),
        })
    }

    async fn begin(f: &Fixture, channel: &str) -> IssuedToken {
        let payload = ProviderToken::bearer("gho_1").to_bytes().unwrap();
        f.sessions
            .begin_pre_login("app1", channel, &payload)
            .await
            .unwrap()
    }

    async fn status(f: &Fixture, issued: &IssuedToken) -> LoginStatus {
        f.sessions.poll_login(&issued.token, "app1").await.unwrap()
    }

    #[tokio::test]
    async fn reconcile_promotes_and_creates_user() {
        let f = fixture(octo());
        let issued = begin(&f, "github").await;

        let login = f
            .reconciler
            .reconcile(&issued.claims.jti, "github")
            .await
            .unwrap();
        assert_eq!(login.claims.uid, "octo@example.com");

        let user = f.sessions.users().get("octo@example.com").await.unwrap().unwrap();
        assert_eq!(user.display_name(), "Octo Cat");

        let (claims, _) = f.sessions.check_token(&login.token).await.unwrap();
        let session = f.sessions.decode_session(&claims).await.unwrap();
        assert_eq!(session.name, "Octo Cat");
        assert_eq!(
            ProviderToken::from_bytes(&session.data).unwrap().access_token,
            "gho_1"
        );
        assert!(matches!(status(&f, &issued).await, LoginStatus::Ready(_)));
    }

    #[tokio::test]
    async fn channel_mismatch_leaves_session_pending() {
        let f = fixture(octo());
        let issued = begin(&f, "google").await;

        let result = f.reconciler.reconcile(&issued.claims.jti, "github").await;
        assert!(matches!(
            result,
            Err(ReconcileError::Session(SessionError::NoPermission(
                Denial::ChannelMismatch
            )))
        ));
        assert_eq!(f.provider.calls(), 0);
        assert_eq!(status(&f, &issued).await, LoginStatus::Pending);
    }

    #[tokio::test]
    async fn provider_failure_leaves_session_pending() {
        let f = fixture(None);
        let issued = begin(&f, "github").await;

        assert!(matches!(
            f.reconciler.reconcile(&issued.claims.jti, "github").await,
            Err(ReconcileError::Provider(ProviderError::MissingEmail("static")))
        ));
        assert_eq!(status(&f, &issued).await, LoginStatus::Pending);
    }

    #[tokio::test]
    async fn unusable_sessions_are_not_reconciled() {
        let f = fixture(octo());
        assert!(matches!(
            f.reconciler.reconcile("missing", "github").await,
            Err(ReconcileError::Session(SessionError::SessionNotFound(_)))
        ));

        let issued = begin(&f, "linkedin").await;
        assert!(matches!(
            f.reconciler.reconcile(&issued.claims.jti, "linkedin").await,
            Err(ReconcileError::UnknownChannel(_))
        ));

        let issued = begin(&f, "github").await;
        f.clock.advance(DEFAULT_PRE_LOGIN_TTL + 1);
        assert!(matches!(
            f.reconciler.reconcile(&issued.claims.jti, "github").await,
            Err(ReconcileError::Session(SessionError::SessionExpired(_)))
        ));
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn spawned_reconciliation_completes_before_drain() {
        let f = fixture(octo());
        let issued = begin(&f, "github").await;

        assert!(f.reconciler.spawn(&issued.claims.jti, "github"));
        assert!(f.reconciler.pool().shutdown(Duration::from_secs(5)).await);
        assert!(matches!(status(&f, &issued).await, LoginStatus::Ready(_)));
        assert!(!f.reconciler.spawn(&issued.claims.jti, "github"));
    }
}
