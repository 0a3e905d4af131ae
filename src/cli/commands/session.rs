use crate::federation::{facebook, github, google, linkedin, worker::DEFAULT_WORKERS};
use crate::session::{DEFAULT_LOGIN_TTL, DEFAULT_PRE_LOGIN_TTL};
use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_PRE_LOGIN_TTL_SECONDS: &str = "pre-login-ttl-seconds";
pub const ARG_LOGIN_TTL_SECONDS: &str = "login-ttl-seconds";
pub const ARG_LOGIN_CHANNELS: &str = "login-channels";
pub const ARG_RECONCILE_WORKERS: &str = "reconcile-workers";

pub const KNOWN_CHANNELS: [&str; 4] = [
    google::CHANNEL,
    facebook::CHANNEL,
    github::CHANNEL,
    linkedin::CHANNEL,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub pre_login_ttl_seconds: i64,
    pub login_ttl_seconds: i64,
    pub login_channels: Vec<String>,
    pub reconcile_workers: usize,
}

/// Split a comma separated channel list, dropping blanks and duplicates.
///
/// # Errors
///
/// Returns an error for channels without a provider implementation.
pub fn parse_channels(value: &str) -> Result<Vec<String>> {
    let mut channels: Vec<String> = Vec::new();
    for channel in value.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let channel = channel.to_ascii_lowercase();
        if !KNOWN_CHANNELS.contains(&channel.as_str()) {
            bail!(
                "unknown login channel: {channel}, expected any of: {}",
                KNOWN_CHANNELS.join(", ")
            );
        }
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    Ok(channels)
}

impl Options {
    /// # Errors
    ///
    /// Returns an error for non positive lifetimes or unknown channels.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let pre_login_ttl_seconds = matches
            .get_one::<i64>(ARG_PRE_LOGIN_TTL_SECONDS)
            .copied()
            .unwrap_or(DEFAULT_PRE_LOGIN_TTL);
        let login_ttl_seconds = matches
            .get_one::<i64>(ARG_LOGIN_TTL_SECONDS)
            .copied()
            .unwrap_or(DEFAULT_LOGIN_TTL);
        if pre_login_ttl_seconds <= 0 || login_ttl_seconds <= 0 {
            bail!("--{ARG_PRE_LOGIN_TTL_SECONDS} and --{ARG_LOGIN_TTL_SECONDS} must be positive");
        }

        let login_channels = parse_channels(
            matches
                .get_one::<String>(ARG_LOGIN_CHANNELS)
                .map_or("", String::as_str),
        )?;

        Ok(Self {
            pre_login_ttl_seconds,
            login_ttl_seconds,
            login_channels,
            reconcile_workers: matches
                .get_one::<usize>(ARG_RECONCILE_WORKERS)
                .copied()
                .unwrap_or(DEFAULT_WORKERS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PRE_LOGIN_TTL_SECONDS)
                .long(ARG_PRE_LOGIN_TTL_SECONDS)
                .help("Lifetime of a pre-login token in seconds")
                .env("EXTER_PRE_LOGIN_TTL_SECONDS")
                .default_value("120")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_TTL_SECONDS)
                .long(ARG_LOGIN_TTL_SECONDS)
                .help("Lifetime of a login token in seconds")
                .env("EXTER_LOGIN_TTL_SECONDS")
                .default_value("28800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_CHANNELS)
                .long(ARG_LOGIN_CHANNELS)
                .help("Comma separated identity providers: google, facebook, github, linkedin")
                .env("EXTER_LOGIN_CHANNELS")
                .default_value("google"),
        )
        .arg(
            Arg::new(ARG_RECONCILE_WORKERS)
                .long(ARG_RECONCILE_WORKERS)
                .help("Maximum concurrent reconciliation tasks")
                .env("EXTER_RECONCILE_WORKERS")
                .default_value("16")
                .value_parser(clap::value_parser!(usize)),
        )
}
