//! # Exter
//!
//! `exter` issues session tokens for applications that delegate login to a
//! federated identity provider (Google, Facebook, GitHub, LinkedIn).
//!
//! A login runs in two steps:
//!
//! 1. `POST /login` exchanges the provider's authorization code and returns a
//!    short-lived **pre-login** token right away.
//! 2. A background worker fetches the user's profile, resolves or creates the
//!    [`users::User`] and promotes the stored session to **login**. The
//!    client polls `POST /verifyLoginToken` with its pre-login token until the
//!    login token is ready.
//!
//! Tokens are RS256 JWTs. The session travels inside the token, compressed and
//! encrypted with a key only the server can derive, and a server-side record
//! keyed by the token id makes logout and promotion authoritative.
//!
//! ## Apps
//!
//! Every login is made on behalf of an [`apps::App`]. Logged in users register
//! and manage their own apps under `/myApp`; `GET /app/{id}` shows the login
//! sources an app can use.
//!
//! ## Storage
//!
//! With `--dsn` apps, users and sessions are kept in `PostgreSQL`, one JSONB
//! table per entity. Without it the server runs on in-memory stores.

pub mod apps;
pub mod cli;
pub mod clock;
pub mod exter;
pub mod federation;
pub mod session;
pub mod storage;
pub mod token;
pub mod users;
pub mod verification;

#[cfg(test)]
mod testing;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_the_crate() {
        assert!(APP_USER_AGENT.starts_with("exter/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn commit_hash_is_never_empty() {
        assert!(!GIT_COMMIT_HASH.is_empty());
    }
}
