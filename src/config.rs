use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::reconcile::ReconcilePolicy;

/// Command-line and environment settings
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "npm-sync",
    version,
    about = "Keep Nginx Proxy Manager proxy hosts in sync with a declarative host list"
)]
pub struct Settings {
    /// Base URL of the Nginx Proxy Manager instance
    #[arg(long, env = "NPM_URL")]
    pub npm_url: Option<String>,

    /// Login identity (email) for the manager
    #[arg(long, env = "NPM_USERNAME")]
    pub username: Option<String>,

    /// Login secret for the manager
    #[arg(long, env = "NPM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Desired-state document, or a directory holding config.json / config.yaml
    #[arg(long, env = "NPM_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Run a single pass and exit instead of watching for changes
    #[arg(long, env = "NPM_SYNC_ONCE")]
    pub once: bool,

    /// Minimum time between two accepted change notifications
    #[arg(long, env = "NPM_SYNC_DEBOUNCE_MS", default_value_t = default_debounce_ms())]
    pub debounce_ms: u64,

    /// How often the watched path is polled for changes
    #[arg(long, env = "NPM_SYNC_POLL_INTERVAL_MS", default_value_t = default_poll_interval_ms())]
    pub poll_interval_ms: u64,

    /// Timeout for each request to the manager
    #[arg(long, env = "NPM_REQUEST_TIMEOUT_SECS", default_value_t = default_request_timeout_secs())]
    pub request_timeout_secs: u64,

    /// Keep going after a failed create/update instead of aborting the pass
    #[arg(long, env = "NPM_SYNC_CONTINUE_ON_ERROR")]
    pub continue_on_error: bool,

    /// Never attach a certificate that does not cover the host's own wildcard
    #[arg(long, env = "NPM_SYNC_NO_CERT_FALLBACK")]
    pub no_certificate_fallback: bool,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, env = "NPM_SYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Manager login
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Validated settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub npm_url: String,
    pub credentials: Credentials,
    pub source: PathBuf,
    pub once: bool,
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub policy: ReconcilePolicy,
}

fn required(
    value: Option<String>,
    name: &'static str,
    env: &'static str,
    flag: &'static str,
) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SyncError::MissingSetting { name, env, flag }),
    }
}

impl Settings {
    /// Check required settings, naming the first one missing
    pub fn validate(self) -> Result<SyncConfig> {
        let npm_url = required(self.npm_url, "NPM_URL", "NPM_URL", "npm-url")?;
        let identity = required(self.username, "USERNAME", "NPM_USERNAME", "username")?;
        let secret = required(self.password, "PASSWORD", "NPM_PASSWORD", "password")?;
        let source = self
            .config
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(SyncError::MissingSetting {
                name: "CONFIG_FILE",
                env: "NPM_CONFIG_FILE",
                flag: "config",
            })?;

        if !npm_url.starts_with("http://") && !npm_url.starts_with("https://") {
            return Err(SyncError::InvalidSetting {
                name: "NPM_URL",
                message: format!("expected an http(s) URL, got '{}'", npm_url),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(SyncError::InvalidSetting {
                name: "NPM_REQUEST_TIMEOUT_SECS",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.poll_interval_ms == 0 {
            return Err(SyncError::InvalidSetting {
                name: "NPM_SYNC_POLL_INTERVAL_MS",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(SyncConfig {
            npm_url: npm_url.trim_end_matches('/').to_string(),
            credentials: Credentials { identity, secret },
            source,
            once: self.once,
            debounce: Duration::from_millis(self.debounce_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            policy: ReconcilePolicy {
                certificate_fallback: !self.no_certificate_fallback,
                continue_on_error: self.continue_on_error,
            },
        })
    }
}
