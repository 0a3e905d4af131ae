use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_RSA_PRIVATE_KEY_FILE: &str = "rsa-private-key-file";
pub const ARG_RSA_PRIVATE_KEY_PASSPHRASE: &str = "rsa-private-key-passphrase";

#[derive(Debug, Clone)]
pub struct Options {
    pub private_key_file: Option<String>,
    pub passphrase: Option<SecretString>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            private_key_file: get_non_empty(ARG_RSA_PRIVATE_KEY_FILE),
            passphrase: get_non_empty(ARG_RSA_PRIVATE_KEY_PASSPHRASE).map(SecretString::from),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RSA_PRIVATE_KEY_FILE)
                .long(ARG_RSA_PRIVATE_KEY_FILE)
                .help("RSA private key used to sign tokens (PKCS#8 or PKCS#1, PEM or DER)")
                .long_help(
                    "RSA private key used to sign tokens (PKCS#8 or PKCS#1, PEM or DER).\n\nWhen unset a 2048-bit key is generated at startup, so tokens do not survive a restart.",
                )
                .env("EXTER_RSA_PRIVATE_KEY_FILE"),
        )
        .arg(
            Arg::new(ARG_RSA_PRIVATE_KEY_PASSPHRASE)
                .long(ARG_RSA_PRIVATE_KEY_PASSPHRASE)
                .help("Passphrase of an encrypted PKCS#8 private key")
                .env("EXTER_RSA_PRIVATE_KEY_PASSPHRASE")
                .hide_env_values(true),
        )
}
