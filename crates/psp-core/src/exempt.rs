//! Exempt-domain policy
//!
//! Sites on the exempt list are never scanned. The list is an ordered set of
//! domain substrings; a host is exempt when it contains any entry.

use serde::{Deserialize, Serialize};

use crate::url::extract_host;

/// The exempt-domain resource: `{ "exemptDomains": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExemptDomainList {
    #[serde(default)]
    pub exempt_domains: Vec<String>,
}

impl ExemptDomainList {
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            exempt_domains: domains,
        }
    }

    /// Parse the resource. Non-string and blank entries are dropped rather
    /// than failing the whole list.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let domains = value
            .get("exemptDomains")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.as_str())
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self::new(domains))
    }

    pub fn domains(&self) -> &[String] {
        &self.exempt_domains
    }

    pub fn is_empty(&self) -> bool {
        self.exempt_domains.is_empty()
    }
}

/// Compiled exempt policy.
#[derive(Debug, Clone, Default)]
pub struct ExemptMatcher {
    /// Lowercased, non-empty entries in list order
    domains: Vec<String>,
}

impl ExemptMatcher {
    pub fn new(list: &ExemptDomainList) -> Self {
        Self::from_domains(list.domains())
    }

    pub fn from_domains<S: AsRef<str>>(domains: &[S]) -> Self {
        let domains = domains
            .iter()
            .map(|d| d.as_ref().trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// First exempt entry contained in `host`.
    pub fn match_host(&self, host: &str) -> Option<&str> {
        if host.is_empty() {
            return None;
        }
        let host = host.to_ascii_lowercase();
        self.domains
            .iter()
            .find(|d| host.contains(d.as_str()))
            .map(String::as_str)
    }

    /// First exempt entry matching the URL's host.
    pub fn match_url(&self, url: &str) -> Option<&str> {
        extract_host(url).and_then(|host| self.match_host(host))
    }

    pub fn is_exempt(&self, url: &str) -> bool {
        self.match_url(url).is_some()
    }
}
