//! Core type definitions for the PSP detector
//!
//! These types cross every boundary in the system: the engine produces them,
//! the protocol carries them and the coordinator persists them.

use serde::{Deserialize, Serialize};

/// Host-assigned tab identifier.
pub type TabId = i32;

/// Per-tab navigation counter. Bumped on every navigation start.
pub type Generation = u64;

/// Cause reported when detection runs before catalog and exempt list are loaded.
pub const CAUSE_NOT_INITIALIZED: &str = "not initialized";

/// Cause reported when the page URL fails structural validation.
pub const CAUSE_INVALID_URL: &str = "invalid url";

// =============================================================================
// Match Method
// =============================================================================

/// How a provider was recognised in the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    /// A literal hostname or match-string token was found
    HostnameToken,
    /// The provider's compiled pattern matched
    Pattern,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostnameToken => "hostname-token",
            Self::Pattern => "pattern",
        }
    }
}

// =============================================================================
// Detection Result
// =============================================================================

/// Outcome of one detection pass. Exactly one variant per pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DetectionResult {
    /// A provider matched the corpus
    Detected {
        provider: String,
        match_method: MatchMethod,
        matched_value: String,
    },
    /// Detection was suppressed by the exempt-domain policy
    Exempt { reason: String, url: String },
    /// The whole catalog was scanned without a match
    None { scanned_count: usize },
    /// The engine could not run
    Error {
        cause: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
}

impl DetectionResult {
    pub fn detected(provider: impl Into<String>, method: MatchMethod, value: impl Into<String>) -> Self {
        Self::Detected {
            provider: provider.into(),
            match_method: method,
            matched_value: value.into(),
        }
    }

    pub fn error(cause: impl Into<String>, context: Option<String>) -> Self {
        Self::Error {
            cause: cause.into(),
            context,
        }
    }

    /// `Detected` and `Exempt` end observation for a page load.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Detected { .. } | Self::Exempt { .. })
    }

    /// Provider name if this is a detection.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Detected { provider, .. } => Some(provider),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Detected { .. } => "detected",
            Self::Exempt { .. } => "exempt",
            Self::None { .. } => "none",
            Self::Error { .. } => "error",
        }
    }
}
