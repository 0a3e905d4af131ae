use crate::cli::{
    actions::{server::Args, Action},
    commands::{keys, providers, session, ARG_DSN, ARG_PORT},
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| SecretString::from(dsn.clone()));

    let keys = keys::Options::parse(matches);
    let session = session::Options::parse(matches).context("invalid session options")?;
    let providers = providers::Options::parse(matches).context("invalid provider options")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        private_key_file: keys.private_key_file,
        private_key_passphrase: keys.passphrase,
        pre_login_ttl_seconds: session.pre_login_ttl_seconds,
        login_ttl_seconds: session.login_ttl_seconds,
        login_channels: session.login_channels,
        reconcile_workers: session.reconcile_workers,
        providers,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn builds_server_args() {
        temp_env::with_vars(
            [
                ("EXTER_DSN", None::<&str>),
                ("EXTER_GITHUB_CLIENT_ID", None),
                ("EXTER_GITHUB_CLIENT_SECRET", None),
                ("EXTER_LOGIN_CHANNELS", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "exter",
                    "--port",
                    "9000",
                    "--dsn",
                    "postgres://localhost/exter",
                    "--login-channels",
                    "github",
                    "--github-client-id",
                    "id",
                    "--github-client-secret",
                    "secret",
                ]);
                let Action::Server(args) = handler(&matches).unwrap();
                assert_eq!(args.port, 9000);
                assert_eq!(
                    args.dsn.as_ref().map(|d| d.expose_secret().to_string()),
                    Some("postgres://localhost/exter".to_string())
                );
                assert_eq!(args.login_channels, vec!["github".to_string()]);
                assert_eq!(
                    args.providers.github.map(|c| c.client_secret.expose_secret().to_string()),
                    Some("secret".to_string())
                );
            },
        );
    }

    #[test]
    fn unknown_channel_fails() {
        temp_env::with_vars([("EXTER_LOGIN_CHANNELS", Some("myspace"))], || {
            let matches = commands::new().get_matches_from(vec!["exter"]);
            assert!(handler(&matches).is_err());
        });
    }
}
