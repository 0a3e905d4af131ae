//! Two-phase login sessions.
//!
//! A login starts as a short lived `pre_login` token issued when the OAuth
//! redirect returns. A background reconciliation promotes the same session to
//! a `login` token once the provider profile has been resolved to a local
//! user. Clients poll with their pre-login token until that happens, so all
//! hand-off between the request path and the workers goes through the stored
//! [`SessionRecord`].

pub mod models;
pub mod store;

pub use models::Session;
pub use store::{SessionRecord, SessionStore};

use crate::clock::Clock;
use crate::storage::{Entity, Store, StoreError};
use crate::token::{self, decrypt_payload, encrypt_payload, SessionClaims, TokenCodec, TokenType};
use crate::users::{User, UserDirectory};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};
use ulid::Ulid;

pub const DEFAULT_PRE_LOGIN_TTL: i64 = 120;
pub const DEFAULT_LOGIN_TTL: i64 = 3600 * 8;
pub const DEFAULT_NEAR_EXPIRY: i64 = 3600 * 3;

const PRE_LOGIN_KEY_LABEL: &str = "exter/pre-login-payload/v1";

/// Why a syntactically valid token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// still a pre-login token, login has not completed yet
    Pending,
    Expired,
    WrongType,
    UserNotFound,
    InvalidApp,
    /// stored session is missing or past its lifetime
    SessionGone,
    ChannelMismatch,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Pending => "login pending",
            Self::Expired => "token expired",
            Self::WrongType => "invalid token type",
            Self::UserNotFound => "user not found",
            Self::InvalidApp => "invalid app",
            Self::SessionGone => "session not found or expired",
            Self::ChannelMismatch => "channel mismatch",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] token::Error),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("no permission: {0}")]
    NoPermission(Denial),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl SessionError {
    #[must_use]
    pub const fn denial(&self) -> Option<Denial> {
        match self {
            Self::NoPermission(denial) => Some(*denial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub pre_login_ttl: i64,
    pub login_ttl: i64,
    pub near_expiry: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pre_login_ttl: DEFAULT_PRE_LOGIN_TTL,
            login_ttl: DEFAULT_LOGIN_TTL,
            near_expiry: DEFAULT_NEAR_EXPIRY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub claims: SessionClaims,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStatus {
    Pending,
    Ready(IssuedToken),
}

pub struct SessionManager {
    codec: Arc<TokenCodec>,
    sessions: SessionStore,
    users: UserDirectory,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    pre_login_key: [u8; 32],
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// # Errors
    ///
    /// Returns an error if the codec cannot sign.
    pub fn new(
        codec: Arc<TokenCodec>,
        store: Arc<dyn Store>,
        users: UserDirectory,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let pre_login_key = codec.derive_key(PRE_LOGIN_KEY_LABEL)?;
        Ok(Self {
            codec,
            sessions: SessionStore::new(store),
            users,
            clock,
            config,
            pre_login_key,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub const fn users(&self) -> &UserDirectory {
        &self.users
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn seal(session: &Session, key: &[u8]) -> Result<Vec<u8>, SessionError> {
        let plaintext = serde_json::to_vec(session).map_err(token::Error::from)?;
        Ok(encrypt_payload(&plaintext, key)?)
    }

    fn open(claims: &SessionClaims, key: &[u8]) -> Result<Session, SessionError> {
        let plaintext = decrypt_payload(&claims.data, key)?;
        Ok(serde_json::from_slice(&plaintext).map_err(token::Error::from)?)
    }

    /// Decrypt the session carried by `claims`.
    ///
    /// # Errors
    ///
    /// Returns `NoPermission(UserNotFound)` when a login claim references a
    /// missing user, or a token error when the payload does not decrypt.
    pub async fn decode_session(&self, claims: &SessionClaims) -> Result<Session, SessionError> {
        match claims.token_type {
            TokenType::PreLogin => Self::open(claims, &self.pre_login_key),
            TokenType::Login => {
                let user = self.require_user(&claims.uid).await?;
                Self::open(claims, user.aes_key().as_bytes())
            }
        }
    }

    async fn require_user(&self, user_id: &str) -> Result<User, SessionError> {
        self.users
            .get(user_id)
            .await?
            .ok_or(SessionError::NoPermission(Denial::UserNotFound))
    }

    /// Start a login: persist a pre-login session holding the provider token
    /// and hand back its signed token.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or persisting fails.
    pub async fn begin_pre_login(
        &self,
        client_id: &str,
        channel: &str,
        provider_token: &[u8],
    ) -> Result<IssuedToken, SessionError> {
        let now = self.clock.now();
        let session = Session {
            cid: client_id.to_string(),
            channel: channel.to_string(),
            uid: String::new(),
            name: String::new(),
            cat: now,
            eat: now + self.config.pre_login_ttl,
            data: provider_token.to_vec(),
        };

        let claims = SessionClaims {
            token_type: TokenType::PreLogin,
            uid: String::new(),
            data: Self::seal(&session, &self.pre_login_key)?,
            aud: session.cid.clone(),
            exp: session.eat,
            iat: now,
            jti: Ulid::new().to_string(),
            sub: session.channel.clone(),
        };
        let token = self.codec.sign(&claims)?;

        let mut record = SessionRecord::from_claims(&claims, token.clone());
        self.sessions.save(&mut record).await?;

        info!(
            session_id = %claims.jti,
            app = client_id,
            channel,
            "pre-login session created"
        );
        Ok(IssuedToken { claims, token })
    }

    /// Load a session awaiting reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `SessionExpired`, or
    /// `NoPermission(WrongType)` when the session was already promoted.
    pub async fn load_pre_login(
        &self,
        session_id: &str,
    ) -> Result<(Session, SessionClaims), SessionError> {
        let now = self.clock.now();
        let record = self.fetch_live(session_id, now).await?;
        if record.token_type() != TokenType::PreLogin {
            return Err(SessionError::NoPermission(Denial::WrongType));
        }

        let claims = self.codec.verify(record.token())?;
        if !claims.is_pre_login() {
            return Err(SessionError::NoPermission(Denial::WrongType));
        }
        if claims.is_expired(now) {
            return Err(SessionError::SessionExpired(session_id.to_string()));
        }

        let session = Self::open(&claims, &self.pre_login_key)?;
        Ok((session, claims))
    }

    async fn fetch_live(&self, session_id: &str, now: i64) -> Result<SessionRecord, SessionError> {
        let record = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        if record.is_expired(now) {
            return Err(SessionError::SessionExpired(session_id.to_string()));
        }
        Ok(record)
    }

    /// Re-issue a session as a login token for `user_id`. The stored record is
    /// overwritten; only one reconciliation runs per session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `SessionExpired` for unusable sessions and
    /// `NoPermission(UserNotFound)` if the user does not exist.
    pub async fn promote_to_login(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        provider_payload: &[u8],
    ) -> Result<IssuedToken, SessionError> {
        let now = self.clock.now();
        let mut record = self.fetch_live(session_id, now).await?;
        let stored = self.codec.verify(record.token())?;
        let user = self.require_user(user_id).await?;

        let mut session = self.decode_session(&stored).await?;
        session.uid = user.id().to_string();
        session.name = display_name.to_string();
        session.data = provider_payload.to_vec();
        session.eat = now + self.config.login_ttl;

        let claims = SessionClaims {
            token_type: TokenType::Login,
            uid: session.uid.clone(),
            data: Self::seal(&session, user.aes_key().as_bytes())?,
            aud: stored.aud,
            exp: session.eat,
            iat: now,
            jti: stored.jti,
            sub: stored.sub,
        };
        let token = self.codec.sign(&claims)?;

        record.update(&claims, token.clone());
        self.sessions.save(&mut record).await?;

        info!(
            session_id,
            user_id = %claims.uid,
            channel = %claims.sub,
            "session promoted to login"
        );
        Ok(IssuedToken { claims, token })
    }

    /// Validate a login token and return its claims and user.
    ///
    /// # Errors
    ///
    /// Returns `NoPermission` for expired tokens, pre-login tokens and tokens
    /// whose user no longer exists; token errors for forged or malformed ones.
    pub async fn check_token(&self, token: &str) -> Result<(SessionClaims, User), SessionError> {
        let claims = self.codec.verify(token)?;
        if claims.is_expired(self.clock.now()) {
            return Err(SessionError::NoPermission(Denial::Expired));
        }
        if claims.is_pre_login() {
            return Err(SessionError::NoPermission(Denial::Pending));
        }
        let user = self.require_user(&claims.uid).await?;
        Ok((claims, user))
    }

    /// Report whether the session behind `token` has been promoted yet.
    ///
    /// # Errors
    ///
    /// Returns `NoPermission` if the token is expired, belongs to another app
    /// or its session is gone.
    pub async fn poll_login(&self, token: &str, app_id: &str) -> Result<LoginStatus, SessionError> {
        let now = self.clock.now();
        let claims = self.codec.verify(token)?;
        if claims.is_expired(now) {
            return Err(SessionError::NoPermission(Denial::Expired));
        }
        if claims.aud != app_id {
            return Err(SessionError::NoPermission(Denial::InvalidApp));
        }

        let record = match self.fetch_live(&claims.jti, now).await {
            Ok(record) => record,
            Err(SessionError::SessionNotFound(_) | SessionError::SessionExpired(_)) => {
                return Err(SessionError::NoPermission(Denial::SessionGone));
            }
            Err(e) => return Err(e),
        };

        match record.token_type() {
            TokenType::PreLogin => {
                debug!(session_id = %claims.jti, "login still pending");
                Ok(LoginStatus::Pending)
            }
            TokenType::Login => {
                let claims = self.codec.verify(record.token())?;
                Ok(LoginStatus::Ready(IssuedToken {
                    claims,
                    token: record.token().to_string(),
                }))
            }
        }
    }

    /// Drop the stored session behind `token`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns a token error if `token` does not verify.
    pub async fn end_session(&self, token: &str) -> Result<bool, SessionError> {
        let claims = self.codec.verify(token)?;
        let Some(record) = self.sessions.get(&claims.jti).await? else {
            return Ok(false);
        };
        let deleted = self.sessions.delete(&record).await?;
        info!(session_id = %claims.jti, "session ended");
        Ok(deleted)
    }
}
