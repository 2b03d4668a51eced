//! Wildcard pattern derivation
//!
//! `svc.example.com` is covered by `*.example.com`: the leftmost label is
//! replaced by `*`. Single-label names cannot be wildcarded.

use std::collections::HashSet;

/// Wildcard pattern covering `domain`, if it has at least two labels
pub fn wildcard_for(domain: &str) -> Option<String> {
    let (_, suffix) = domain.split_once('.')?;
    Some(format!("*.{}", suffix))
}

/// Wildcard patterns covering `domains`, deduplicated, in order of first
/// appearance.
pub fn derive<I, S>(domains: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    domains
        .into_iter()
        .filter_map(|d| wildcard_for(d.as_ref()))
        .filter(|pattern| seen.insert(pattern.clone()))
        .collect()
}
