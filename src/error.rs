//! Error types for the reconciliation engine

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`SyncError`], reported alongside failures in
/// log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required setting is missing or invalid (startup-fatal)
    Config,
    /// The credential exchange was rejected
    Auth,
    /// A remote call returned a non-success status
    Api,
    /// A remote call never produced a response (connect error, timeout)
    Transport,
    /// The desired-state document could not be read or understood
    Parse,
    /// The change watcher could not be set up
    Watch,
}

impl ErrorKind {
    /// Short code used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Api => "API_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::Parse => "PARSE_ERROR",
            ErrorKind::Watch => "WATCH_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{name} not set. Please set {env} or provide --{flag}")]
    MissingSetting {
        name: &'static str,
        env: &'static str,
        flag: &'static str,
    },

    #[error("invalid setting {name}: {message}")]
    InvalidSetting { name: &'static str, message: String },

    #[error("authentication rejected (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("{operation} failed (HTTP {status}): {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MissingSetting { .. } | SyncError::InvalidSetting { .. } => {
                ErrorKind::Config
            }
            SyncError::Auth { .. } => ErrorKind::Auth,
            SyncError::Api { .. } => ErrorKind::Api,
            SyncError::Transport { .. } => ErrorKind::Transport,
            SyncError::Parse { .. } | SyncError::Io { .. } => ErrorKind::Parse,
            SyncError::Watch(_) => ErrorKind::Watch,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        SyncError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn transport(operation: impl Into<String>, source: reqwest::Error) -> Self {
        SyncError::Transport {
            operation: operation.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_setting_message_names_item() {
        let err = SyncError::MissingSetting {
            name: "NPM_URL",
            env: "NPM_URL",
            flag: "npm-url",
        };
        assert_eq!(
            err.to_string(),
            "NPM_URL not set. Please set NPM_URL or provide --npm-url"
        );
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_error_kinds() {
        let auth = SyncError::Auth {
            status: 401,
            body: "denied".to_string(),
        };
        assert_eq!(auth.kind(), ErrorKind::Auth);
        assert!(auth.to_string().contains("401"));

        let api = SyncError::Api {
            operation: "update proxy host 3".to_string(),
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(api.kind(), ErrorKind::Api);
        assert!(api.to_string().contains("update proxy host 3"));
        assert!(api.to_string().contains("boom"));

        let parse = SyncError::parse("hosts.json", "missing field `domain_names`");
        assert_eq!(parse.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(ErrorKind::Auth.as_str(), "AUTH_ERROR");
        assert_eq!(ErrorKind::Parse.as_str(), "PARSE_ERROR");
    }
}
