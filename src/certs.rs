//! Certificate matching
//!
//! Binds each wildcard pattern required by the desired hosts to a remote
//! certificate that lists that exact pattern, and resolves the certificate
//! for an individual host domain.

use tracing::{debug, info, warn};

use crate::hosts::{Certificate, CertificateId};
use crate::wildcard::wildcard_for;

/// Wildcard pattern to certificate bindings for one pass.
///
/// Keys are unique and kept in insertion order; the first entry is the
/// fallback used for domains whose own pattern is unmatched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CertificateMapping {
    entries: Vec<(String, CertificateId)>,
}

impl CertificateMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `pattern`, keeping an existing binding if there is one
    pub fn insert(&mut self, pattern: impl Into<String>, id: CertificateId) -> bool {
        let pattern = pattern.into();
        if self.get(&pattern).is_some() {
            return false;
        }
        self.entries.push((pattern, id));
        true
    }

    pub fn get(&self, pattern: &str) -> Option<CertificateId> {
        self.entries
            .iter()
            .find(|(p, _)| p == pattern)
            .map(|(_, id)| *id)
    }

    /// First-inserted binding
    pub fn first(&self) -> Option<(&str, CertificateId)> {
        self.entries.first().map(|(p, id)| (p.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of matching the wildcard patterns of a pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub mapping: CertificateMapping,
    /// Patterns no certificate lists
    pub unmatched: Vec<String>,
}

/// Match every wildcard pattern against the certificate inventory.
///
/// For each pattern the first certificate listing it wins. Unmatched
/// patterns are reported, never fatal.
pub fn match_certificates(wildcards: &[String], certificates: &[Certificate]) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();

    for pattern in wildcards {
        match certificates.iter().find(|cert| cert.covers(pattern)) {
            Some(cert) => {
                info!(
                    certificate = %cert.nice_name,
                    certificate_id = %cert.id,
                    wildcard = %pattern,
                    "Using certificate"
                );
                outcome.mapping.insert(pattern.as_str(), cert.id);
            }
            None => {
                warn!(wildcard = %pattern, "No certificate covers wildcard");
                outcome.unmatched.push(pattern.clone());
            }
        }
    }

    if outcome.mapping.is_empty() && !wildcards.is_empty() {
        warn!(
            wildcards = %wildcards.join(", "),
            "No matching wildcard certificates found; hosts will be submitted without a certificate"
        );
    }

    outcome
}

/// Certificate for `domain`.
///
/// The domain's own wildcard binding is preferred. Without one, and when
/// `fallback` is set, the first binding of the mapping is used even though it
/// covers a different suffix.
pub fn resolve_for_domain(
    domain: &str,
    mapping: &CertificateMapping,
    fallback: bool,
) -> Option<CertificateId> {
    if let Some(id) = wildcard_for(domain).and_then(|pattern| mapping.get(&pattern)) {
        return Some(id);
    }

    if !fallback {
        debug!(domain = %domain, "No certificate for domain");
        return None;
    }

    let (pattern, id) = mapping.first()?;
    warn!(
        domain = %domain,
        wildcard = %pattern,
        certificate_id = %id,
        "Domain has no matching wildcard certificate, falling back to first mapped certificate"
    );
    Some(id)
}
