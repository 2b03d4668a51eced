//! Host reconciliation
//!
//! A pass loads the desired hosts, derives the wildcard patterns they need,
//! lists certificates and existing hosts once each, then creates or replaces
//! every desired host in document order.

use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::certs::{match_certificates, resolve_for_domain, CertificateMapping};
use crate::client::{NpmClient, Session};
use crate::config::Credentials;
use crate::error::Result;
use crate::hosts::{load_document, select_source, DesiredHost, HostId, HostPayload, RemoteHost};
use crate::wildcard::derive;

/// Behaviour switches for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Attach the first mapped certificate to hosts whose own wildcard has none
    pub certificate_fallback: bool,
    /// Record failed create/update calls and keep going instead of aborting
    pub continue_on_error: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            certificate_fallback: true,
            continue_on_error: false,
        }
    }
}

/// What to do with one desired host
#[derive(Debug, Clone, PartialEq)]
pub enum HostAction {
    Create { payload: HostPayload },
    Update { id: HostId, payload: HostPayload },
}

impl HostAction {
    pub fn payload(&self) -> &HostPayload {
        match self {
            HostAction::Create { payload } | HostAction::Update { payload, .. } => payload,
        }
    }

    pub fn domain(&self) -> &str {
        self.payload()
            .domain_names
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Decide create or update for each desired host, in order.
///
/// `existing` is a snapshot taken once for the pass; hosts created earlier in
/// the same pass are not visible to later entries.
pub fn plan(
    desired: Vec<DesiredHost>,
    existing: &[RemoteHost],
    mapping: &CertificateMapping,
    certificate_fallback: bool,
) -> Vec<HostAction> {
    desired
        .into_iter()
        .map(|host| {
            let domain = host.canonical_domain().to_string();
            let certificate_id = resolve_for_domain(&domain, mapping, certificate_fallback);
            let payload = host.into_payload(certificate_id);

            match existing.iter().find(|remote| remote.serves(&domain)) {
                Some(remote) => HostAction::Update {
                    id: remote.id,
                    payload,
                },
                None => HostAction::Create { payload },
            }
        })
        .collect()
}

/// Summary of a completed pass, by canonical domain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub source: PathBuf,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<String>,
    /// Hosts submitted without a certificate
    pub unsecured: Vec<String>,
    /// No wildcard pattern matched any certificate
    pub certificate_warning: bool,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs reconciliation passes against one manager instance
pub struct Reconciler {
    client: NpmClient,
    credentials: Credentials,
    source: PathBuf,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(
        client: NpmClient,
        credentials: Credentials,
        source: impl Into<PathBuf>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            client,
            credentials,
            source: source.into(),
            policy,
        }
    }

    /// Run one full pass.
    ///
    /// Returns `Ok(None)` when the source directory holds no document; the
    /// pass is skipped without touching the remote.
    pub async fn run_pass(&self) -> Result<Option<PassReport>> {
        let Some(path) = select_source(&self.source) else {
            warn!(source = %self.source.display(), "No desired-state document found, skipping pass");
            return Ok(None);
        };

        let desired = load_document(&path)?;
        let mut report = PassReport {
            source: path.clone(),
            ..PassReport::default()
        };

        if desired.is_empty() {
            info!(path = %path.display(), "Desired state is empty, nothing to do");
            return Ok(Some(report));
        }

        let wildcards = derive(desired.iter().flat_map(|h| h.domain_names.iter()));
        info!(wildcards = %wildcards.join(", "), hosts = desired.len(), "Extracted wildcard domains");

        let session = self
            .client
            .authenticate(&self.credentials.identity, &self.credentials.secret)
            .await?;

        let certificates = session.list_certificates().await?;
        let outcome = match_certificates(&wildcards, &certificates);
        report.certificate_warning = outcome.mapping.is_empty();

        let existing = session.list_hosts().await?;
        let actions = plan(
            desired,
            &existing,
            &outcome.mapping,
            self.policy.certificate_fallback,
        );

        for action in actions {
            let domain = action.domain().to_string();
            if action.payload().certificate_id.is_none() {
                report.unsecured.push(domain.clone());
            }

            match apply(&session, &action).await {
                Ok(()) => match action {
                    HostAction::Create { .. } => report.created.push(domain),
                    HostAction::Update { .. } => report.updated.push(domain),
                },
                Err(e) if self.policy.continue_on_error => {
                    error!(domain = %domain, kind = e.kind().as_str(), error = %e, "Host sync failed, continuing");
                    report.failed.push(domain);
                }
                Err(e) => {
                    error!(domain = %domain, kind = e.kind().as_str(), error = %e, "Host sync failed, aborting pass");
                    return Err(e);
                }
            }
        }

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            failed = report.failed.len(),
            unsecured = report.unsecured.len(),
            "Synchronization completed"
        );

        Ok(Some(report))
    }
}

async fn apply(session: &Session, action: &HostAction) -> Result<()> {
    match action {
        HostAction::Update { id, payload } => {
            info!(domain = %action.domain(), host_id = %id, certificate_id = ?payload.certificate_id, "Updating proxy host");
            session.update_host(*id, payload).await?;
        }
        HostAction::Create { payload } => {
            info!(domain = %action.domain(), certificate_id = ?payload.certificate_id, "Creating proxy host");
            if let Some(created) = session.create_host(payload).await? {
                info!(domain = %action.domain(), host_id = %created.id, "Proxy host created");
            }
        }
    }
    Ok(())
}
