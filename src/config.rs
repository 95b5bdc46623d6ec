use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

use crate::models::ObjectId;

/// Default remote API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.snpan.com";

/// Default lease lifetime of an upload lock.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 300;

/// Account credentials exchanged for a short-lived authorization code.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.account_id.trim().is_empty() && !self.secret_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Process-wide sync configuration, loaded once and passed explicitly to
/// every engine component.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Master switch: uploads and URL rewriting only happen when set.
    pub enabled: bool,
    /// Upload new objects as soon as they are created.
    pub auto_replace: bool,
    /// Keep local files after a confirmed upload.
    pub keep_local: bool,
    pub credentials: Credentials,
    /// Destination folder on the remote side.
    pub target_folder_id: Option<String>,
    pub api_base_url: String,
    /// Public URL prefix under which local files are served. Free-text
    /// content rewriting only considers URLs starting with it.
    pub local_base_url: Option<String>,
    pub lease_ttl: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_replace: false,
            keep_local: true,
            credentials: Credentials::default(),
            target_folder_id: None,
            api_base_url: DEFAULT_API_BASE_URL.into(),
            local_base_url: None,
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub sync: SyncSettings,
}

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload local media to cloud storage and rewrite its URLs")]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for values otherwise read from the environment.
#[derive(clap::Args, Debug, Default)]
pub struct ConfigArgs {
    /// Host to bind to (overrides MEDIA_SYNC_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_SYNC_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Database URL (overrides MEDIA_SYNC_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Remote API root (overrides MEDIA_SYNC_API_BASE_URL)
    #[arg(long, global = true)]
    pub api_base_url: Option<String>,

    /// Public URL prefix of local files (overrides MEDIA_SYNC_LOCAL_BASE_URL)
    #[arg(long, global = true)]
    pub local_base_url: Option<String>,

    /// Keep local files after upload (overrides MEDIA_SYNC_KEEP_LOCAL)
    #[arg(long, global = true)]
    pub keep_local: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the admin HTTP API
    Serve,
    /// Create the database schema and exit
    Migrate,
    /// Register a local object
    Register {
        #[arg(long)]
        id: ObjectId,
        #[arg(long)]
        path: String,
        /// Secondary variant, repeatable
        #[arg(long = "variant")]
        variants: Vec<String>,
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Upload a single object
    Sync { id: ObjectId },
    /// Upload every unsynced object, page by page
    Batch {
        /// Checkpoint file read on start and updated after every page
        #[arg(long, default_value = "./data/batch-checkpoint.json")]
        checkpoint: String,
        /// Ignore any saved checkpoint and start from the first page
        #[arg(long)]
        restart: bool,
        /// What to do with a page that still fails after all retries
        #[arg(long, value_enum, default_value_t = FailureAction::Stop)]
        on_page_failure: FailureAction,
    },
    /// Delete the local files of every synced object
    DeleteLocalAll,
    /// Print the cloud URL a local reference resolves to
    Rewrite { id: ObjectId, value: String },
    /// Delete the local files of a synced object
    DeleteLocal { id: ObjectId },
    /// Forget the sync state of an object so it uploads again
    Reset { id: ObjectId },
    /// Check credentials and folder against the remote API
    TestConnection,
    /// Print an authenticated download link of a remote file
    DownloadLink { file: String },
    /// Release leases older than the given age
    CleanupLocks {
        #[arg(long, default_value_t = 3600)]
        older_than_secs: u64,
    },
    /// Clear records that share a cloud URL with a lower object id
    CleanupDuplicates,
    /// Print population counters
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureAction {
    Skip,
    Stop,
}

impl AppConfig {
    /// Merge environment variables and CLI overrides into AppConfig.
    pub fn from_env_and_args(args: &ConfigArgs) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("MEDIA_SYNC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("MEDIA_SYNC_PORT", 3000u16)?;
        let env_db = env::var("MEDIA_SYNC_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/media_sync.db".into());
        let env_api =
            env::var("MEDIA_SYNC_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.into());
        let env_local_base = env_optional("MEDIA_SYNC_LOCAL_BASE_URL");
        let env_keep_local = env_parse("MEDIA_SYNC_KEEP_LOCAL", true)?;

        let sync = SyncSettings {
            enabled: env_parse("MEDIA_SYNC_ENABLED", false)?,
            auto_replace: env_parse("MEDIA_SYNC_AUTO_REPLACE", false)?,
            keep_local: args.keep_local.unwrap_or(env_keep_local),
            credentials: Credentials {
                account_id: env::var("MEDIA_SYNC_ACCOUNT_ID").unwrap_or_default(),
                secret_key: env::var("MEDIA_SYNC_SECRET_KEY").unwrap_or_default(),
            },
            target_folder_id: env_optional("MEDIA_SYNC_FOLDER_ID"),
            api_base_url: args
                .api_base_url
                .clone()
                .unwrap_or(env_api)
                .trim_end_matches('/')
                .to_string(),
            local_base_url: args.local_base_url.clone().or(env_local_base),
            lease_ttl: Duration::from_secs(env_parse(
                "MEDIA_SYNC_LEASE_TTL_SECS",
                DEFAULT_LEASE_TTL_SECS,
            )?),
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.clone().unwrap_or(env_db),
            sync,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = Credentials {
            account_id: "42".into(),
            secret_key: "hunter2".into(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("42"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn incomplete_credentials_are_detected() {
        assert!(!Credentials::default().is_complete());
        let creds = Credentials {
            account_id: "42".into(),
            secret_key: "  ".into(),
        };
        assert!(!creds.is_complete());
    }

    #[test]
    fn cli_overrides_win_over_defaults() {
        let args = ConfigArgs {
            port: Some(8088),
            api_base_url: Some("http://127.0.0.1:9/".into()),
            keep_local: Some(false),
            ..ConfigArgs::default()
        };
        let cfg = AppConfig::from_env_and_args(&args).expect("config");
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.sync.api_base_url, "http://127.0.0.1:9");
        assert!(!cfg.sync.keep_local);
    }
}
