use crate::federation::Credentials;
use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_OAUTH_REDIRECT_URL: &str = "oauth-redirect-url";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_FACEBOOK_APP_ID: &str = "facebook-app-id";
pub const ARG_FACEBOOK_APP_SECRET: &str = "facebook-app-secret";
pub const ARG_GITHUB_CLIENT_ID: &str = "github-client-id";
pub const ARG_GITHUB_CLIENT_SECRET: &str = "github-client-secret";
pub const ARG_LINKEDIN_CLIENT_ID: &str = "linkedin-client-id";
pub const ARG_LINKEDIN_CLIENT_SECRET: &str = "linkedin-client-secret";

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub redirect_url: String,
    pub google: Option<Credentials>,
    pub facebook: Option<Credentials>,
    pub github: Option<Credentials>,
    pub linkedin: Option<Credentials>,
}

impl Options {
    /// A provider is configured when both its id and secret are set.
    ///
    /// # Errors
    ///
    /// Returns an error when only one half of a pair is given.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let redirect_url = get_non_empty(ARG_OAUTH_REDIRECT_URL).unwrap_or_default();

        let pair = |id_arg: &str, secret_arg: &str| -> Result<Option<Credentials>> {
            match (get_non_empty(id_arg), get_non_empty(secret_arg)) {
                (Some(id), Some(secret)) => Ok(Some(Credentials::new(&id, &secret, &redirect_url))),
                (None, None) => Ok(None),
                _ => bail!("--{id_arg} and --{secret_arg} must be set together"),
            }
        };

        Ok(Self {
            google: pair(ARG_GOOGLE_CLIENT_ID, ARG_GOOGLE_CLIENT_SECRET)?,
            facebook: pair(ARG_FACEBOOK_APP_ID, ARG_FACEBOOK_APP_SECRET)?,
            github: pair(ARG_GITHUB_CLIENT_ID, ARG_GITHUB_CLIENT_SECRET)?,
            linkedin: pair(ARG_LINKEDIN_CLIENT_ID, ARG_LINKEDIN_CLIENT_SECRET)?,
            redirect_url,
        })
    }
}

fn client_id(id: &'static str, help: &'static str, env: &'static str) -> Arg {
    Arg::new(id).long(id).help(help).env(env)
}

fn client_secret(id: &'static str, help: &'static str, env: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .hide_env_values(true)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OAUTH_REDIRECT_URL)
                .long(ARG_OAUTH_REDIRECT_URL)
                .help("Redirect URI registered with the providers for the code exchange")
                .env("EXTER_OAUTH_REDIRECT_URL")
                .default_value("postmessage"),
        )
        .arg(client_id(
            ARG_GOOGLE_CLIENT_ID,
            "Google OAuth client id",
            "EXTER_GOOGLE_CLIENT_ID",
        ))
        .arg(client_secret(
            ARG_GOOGLE_CLIENT_SECRET,
            "Google OAuth client secret",
            "EXTER_GOOGLE_CLIENT_SECRET",
        ))
        .arg(client_id(
            ARG_FACEBOOK_APP_ID,
            "Facebook app id",
            "EXTER_FACEBOOK_APP_ID",
        ))
        .arg(client_secret(
            ARG_FACEBOOK_APP_SECRET,
            "Facebook app secret",
            "EXTER_FACEBOOK_APP_SECRET",
        ))
        .arg(client_id(
            ARG_GITHUB_CLIENT_ID,
            "GitHub OAuth app client id",
            "EXTER_GITHUB_CLIENT_ID",
        ))
        .arg(client_secret(
            ARG_GITHUB_CLIENT_SECRET,
            "GitHub OAuth app client secret",
            "EXTER_GITHUB_CLIENT_SECRET",
        ))
        .arg(client_id(
            ARG_LINKEDIN_CLIENT_ID,
            "LinkedIn client id",
            "EXTER_LINKEDIN_CLIENT_ID",
        ))
        .arg(client_secret(
            ARG_LINKEDIN_CLIENT_SECRET,
            "LinkedIn client secret",
            "EXTER_LINKEDIN_CLIENT_SECRET",
        ))
}
