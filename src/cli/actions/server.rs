use crate::{
    apps::AppRegistry,
    cli::commands::providers,
    cli::telemetry,
    clock::{Clock, SystemClock},
    exter::{self, Exter},
    federation::{
        facebook::Facebook, github::GitHub, google::Google, http_client, linkedin::LinkedIn,
        ProviderRegistry, Reconciler, WorkerPool,
    },
    session::{SessionConfig, SessionManager, DEFAULT_NEAR_EXPIRY},
    storage::{
        postgres::{self, TABLE_APP, TABLE_SESSION, TABLE_USER},
        MemoryStore, PgStore, Store,
    },
    token::TokenCodec,
    users::UserDirectory,
    verification::{GoogleTokenInfo, VerificationCache},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

const GENERATED_KEY_BITS: usize = 2048;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub private_key_file: Option<String>,
    pub private_key_passphrase: Option<SecretString>,
    pub pre_login_ttl_seconds: i64,
    pub login_ttl_seconds: i64,
    pub login_channels: Vec<String>,
    pub reconcile_workers: usize,
    pub providers: providers::Options,
}

struct Stores {
    apps: Arc<dyn Store>,
    users: Arc<dyn Store>,
    sessions: Arc<dyn Store>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the signing key, the database or the listener cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let codec = Arc::new(load_codec(&args).await?);
    let stores = open_stores(args.dsn.as_ref()).await?;
    let store_backend = stores.sessions.backend();

    let apps = AppRegistry::new(stores.apps);
    apps.ensure_system_app(&args.login_channels)
        .await
        .context("could not create the system app")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http = http_client().context("could not build the HTTP client")?;
    let cache = Arc::new(VerificationCache::new(
        Arc::new(GoogleTokenInfo::new(http.clone())),
        clock.clone(),
    ));
    let providers = Arc::new(build_providers(
        &args.providers,
        &args.login_channels,
        &http,
        &cache,
    ));

    let sessions = Arc::new(SessionManager::new(
        codec,
        stores.sessions,
        UserDirectory::new(stores.users),
        clock,
        SessionConfig {
            pre_login_ttl: args.pre_login_ttl_seconds,
            login_ttl: args.login_ttl_seconds,
            near_expiry: DEFAULT_NEAR_EXPIRY.min(args.login_ttl_seconds),
        },
    )?);

    let pool = WorkerPool::new(args.reconcile_workers);
    let reconciler = Reconciler::new(sessions.clone(), providers.clone(), pool.clone());

    let state = Arc::new(Exter {
        sessions,
        apps,
        providers,
        reconciler,
        login_channels: args.login_channels,
        store_backend,
    });

    let served = exter::serve(args.port, state, shutdown_signal()).await;

    info!("draining {} reconciliation task(s)", pool.in_flight());
    if !pool.shutdown(DRAIN_TIMEOUT).await {
        warn!(
            "reconciliation tasks still running after {}s",
            DRAIN_TIMEOUT.as_secs()
        );
    }
    telemetry::shutdown_tracer();

    served
}

async fn load_codec(args: &Args) -> Result<TokenCodec> {
    if let Some(path) = &args.private_key_file {
        let key = tokio::fs::read(path)
            .await
            .with_context(|| format!("could not read private key {path}"))?;
        let passphrase = args
            .private_key_passphrase
            .as_ref()
            .map(|p| p.expose_secret());
        return TokenCodec::from_pem(&key, passphrase)
            .with_context(|| format!("could not load private key {path}"));
    }

    warn!("no private key configured, generating one; tokens will not survive a restart");
    tokio::task::spawn_blocking(|| TokenCodec::generate(GENERATED_KEY_BITS))
        .await
        .context("key generation task failed")?
        .context("could not generate a private key")
}

async fn open_stores(dsn: Option<&SecretString>) -> Result<Stores> {
    let Some(dsn) = dsn else {
        warn!("no DSN configured, using in-memory storage");
        return Ok(Stores {
            apps: Arc::new(MemoryStore::new()),
            users: Arc::new(MemoryStore::new()),
            sessions: Arc::new(MemoryStore::new()),
        });
    };

    let pool = postgres::connect(dsn.expose_secret())
        .await
        .context("could not connect to the database")?;

    let mut stores = Vec::with_capacity(3);
    for table in [TABLE_APP, TABLE_USER, TABLE_SESSION] {
        let store = PgStore::new(pool.clone(), table);
        store
            .migrate()
            .await
            .with_context(|| format!("could not create table {table}"))?;
        stores.push(Arc::new(store) as Arc<dyn Store>);
    }
    let sessions = stores.pop().context("missing session store")?;
    let users = stores.pop().context("missing user store")?;
    let apps = stores.pop().context("missing app store")?;

    Ok(Stores {
        apps,
        users,
        sessions,
    })
}

fn build_providers(
    options: &providers::Options,
    channels: &[String],
    http: &reqwest::Client,
    cache: &Arc<VerificationCache>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    if let Some(credentials) = &options.google {
        registry.register(Arc::new(Google::new(
            http.clone(),
            credentials.clone(),
            cache.clone(),
        )));
    }
    if let Some(credentials) = &options.facebook {
        registry.register(Arc::new(Facebook::new(http.clone(), credentials.clone())));
    }
    if let Some(credentials) = &options.github {
        registry.register(Arc::new(GitHub::new(http.clone(), credentials.clone())));
    }
    if let Some(credentials) = &options.linkedin {
        registry.register(Arc::new(LinkedIn::new(http.clone(), credentials.clone())));
    }

    for channel in channels {
        if registry.get(channel).is_none() {
            warn!("login channel {channel} has no credentials and stays disabled");
        }
    }

    registry
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn log_startup_args(args: &Args) {
    let configured = |creds: Option<&crate::federation::Credentials>| {
        creds.map_or("no", |_| "yes").to_string()
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_ref()
                .map_or_else(|| "memory".to_string(), |dsn| redact_dsn(dsn.expose_secret())),
        ),
        (
            "private_key",
            args.private_key_file
                .clone()
                .unwrap_or_else(|| "generated".to_string()),
        ),
        ("login_channels", args.login_channels.join(",")),
        ("pre_login_ttl", format!("{}s", args.pre_login_ttl_seconds)),
        ("login_ttl", format!("{}s", args.login_ttl_seconds)),
        ("reconcile_workers", args.reconcile_workers.to_string()),
        ("google", configured(args.providers.google.as_ref())),
        ("facebook", configured(args.providers.facebook.as_ref())),
        ("github", configured(args.providers.github.as_ref())),
        ("linkedin", configured(args.providers.linkedin.as_ref())),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "exter {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
