//! Proxy host and certificate models plus desired-state document loading
//!
//! The desired-state document is a top-level list of proxy host objects in
//! JSON or YAML. Only `domain_names` is interpreted; every other field is
//! carried through to the remote API untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SyncError};

/// File names tried, in order, when the configured source is a directory
pub const DIRECTORY_CANDIDATES: &[&str] = &["config.json", "config.yaml", "config.yml"];

/// Remote identifier of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(pub u64);

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote identifier of a proxy host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the desired-state document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DesiredHost {
    /// Domains served by this host; the first one identifies it
    pub domain_names: Vec<String>,

    /// Everything else (forward host, scheme, flags, ...), passed through
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl DesiredHost {
    /// The domain used to find this host among the remote ones
    pub fn canonical_domain(&self) -> &str {
        self.domain_names.first().map(String::as_str).unwrap_or_default()
    }

    /// Build the outgoing request body, replacing any `certificate_id`
    /// present in the document with the resolved one.
    pub fn into_payload(self, certificate_id: Option<CertificateId>) -> HostPayload {
        let mut settings = self.settings;
        settings.remove("certificate_id");
        settings.remove("domain_names");
        HostPayload {
            domain_names: self.domain_names,
            certificate_id,
            settings,
        }
    }
}

/// Request body for creating or replacing a proxy host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostPayload {
    pub domain_names: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<CertificateId>,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// A proxy host as the remote manager knows it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteHost {
    pub id: HostId,

    #[serde(default)]
    pub domain_names: Vec<String>,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl RemoteHost {
    pub fn serves(&self, domain: &str) -> bool {
        self.domain_names.iter().any(|d| d == domain)
    }
}

/// A certificate held by the remote manager
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,

    #[serde(default)]
    pub nice_name: String,

    /// Names covered, possibly literal wildcards such as `*.example.com`
    #[serde(default)]
    pub domain_names: Vec<String>,
}

impl Certificate {
    pub fn covers(&self, pattern: &str) -> bool {
        self.domain_names.iter().any(|d| d == pattern)
    }
}

/// Document syntax, chosen from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

/// Resolve the configured source to the document file to read.
///
/// A file path is returned as is. For a directory, `config.json` wins over
/// the YAML names; `None` means the directory holds no document yet.
pub fn select_source(path: &Path) -> Option<PathBuf> {
    if !path.is_dir() {
        return path.is_file().then(|| path.to_path_buf());
    }

    DIRECTORY_CANDIDATES
        .iter()
        .map(|name| path.join(name))
        .find(|candidate| candidate.is_file())
}

/// Parse a desired-state document from text
pub fn parse_document(content: &str, format: DocumentFormat, path: &Path) -> Result<Vec<DesiredHost>> {
    let hosts: Vec<DesiredHost> = match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| SyncError::parse(path, e))?
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| SyncError::parse(path, e))?
        }
    };

    for (index, host) in hosts.iter().enumerate() {
        if host.domain_names.is_empty() {
            return Err(SyncError::parse(
                path,
                format!("entry {} has an empty domain_names list", index),
            ));
        }
        if host.domain_names.iter().any(|d| d.trim().is_empty()) {
            return Err(SyncError::parse(
                path,
                format!("entry {} contains a blank domain name", index),
            ));
        }
    }

    Ok(hosts)
}

/// Read and parse the desired-state document at `path`
pub fn load_document(path: &Path) -> Result<Vec<DesiredHost>> {
    let content = std::fs::read_to_string(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let format = DocumentFormat::from_path(path);
    let hosts = parse_document(&content, format, path)?;
    debug!(path = %path.display(), ?format, hosts = hosts.len(), "Desired state loaded");
    Ok(hosts)
}
