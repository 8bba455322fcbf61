//! Detection Engine
//!
//! `detect` is a pure function over a catalog, an exempt matcher, the page
//! URL and the scan corpus. It never panics and never performs I/O; every
//! failure mode is a `DetectionResult::Error`.
//!
//! Order of checks:
//! 1. catalog and exempt matcher loaded
//! 2. URL structurally valid
//! 3. exempt host short-circuit
//! 4. providers in catalog order, first match wins

use std::sync::Arc;

use crate::catalog::ProviderCatalog;
use crate::exempt::ExemptMatcher;
use crate::types::{DetectionResult, CAUSE_INVALID_URL, CAUSE_NOT_INITIALIZED};
use crate::url::is_valid_url;

/// Run one detection pass.
pub fn detect(
    catalog: Option<&ProviderCatalog>,
    exempt: Option<&ExemptMatcher>,
    url: &str,
    corpus: &str,
) -> DetectionResult {
    let (catalog, exempt) = match (catalog, exempt) {
        (Some(c), Some(e)) => (c, e),
        (None, _) => {
            return DetectionResult::error(CAUSE_NOT_INITIALIZED, Some("catalog not loaded".into()))
        }
        (_, None) => {
            return DetectionResult::error(CAUSE_NOT_INITIALIZED, Some("exempt list not loaded".into()))
        }
    };

    if !is_valid_url(url) {
        return DetectionResult::error(CAUSE_INVALID_URL, Some(url.to_string()));
    }

    if let Some(entry) = exempt.match_url(url) {
        return DetectionResult::Exempt {
            reason: format!("host matches exempt domain '{}'", entry),
            url: url.to_string(),
        };
    }

    let corpus_lower = corpus.to_ascii_lowercase();
    let mut scanned = 0usize;

    for provider in catalog.providers() {
        scanned += 1;
        if let Some(hit) = provider.matcher.test(corpus, &corpus_lower) {
            return DetectionResult::Detected {
                provider: provider.name().to_string(),
                match_method: hit.method,
                matched_value: hit.value,
            };
        }
    }

    DetectionResult::None {
        scanned_count: scanned,
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Holds the loaded catalog and exempt matcher for repeated passes.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    catalog: Option<Arc<ProviderCatalog>>,
    exempt: Option<ExemptMatcher>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(mut self, catalog: Arc<ProviderCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_exempt(mut self, exempt: ExemptMatcher) -> Self {
        self.exempt = Some(exempt);
        self
    }

    pub fn set_catalog(&mut self, catalog: Arc<ProviderCatalog>) {
        self.catalog = Some(catalog);
    }

    pub fn set_exempt(&mut self, exempt: ExemptMatcher) {
        self.exempt = Some(exempt);
    }

    pub fn catalog(&self) -> Option<&ProviderCatalog> {
        self.catalog.as_deref()
    }

    pub fn exempt(&self) -> Option<&ExemptMatcher> {
        self.exempt.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.catalog.is_some() && self.exempt.is_some()
    }

    pub fn detect(&self, url: &str, corpus: &str) -> DetectionResult {
        detect(self.catalog(), self.exempt(), url, corpus)
    }
}
