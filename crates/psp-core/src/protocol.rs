//! Page agent ⇄ coordinator protocol
//!
//! Requests are JSON objects tagged by `action`; responses are tagged by
//! `type`. Inbound requests go through [`parse_request`], which rejects
//! anything malformed or unknown with a typed error so the router can answer
//! with `Response::Error` instead of dropping the message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::CatalogDocument;
use crate::types::{DetectionResult, Generation, MatchMethod, TabId};

/// Provider value used to report an exempt page.
pub const EXEMPT_SENTINEL: &str = "__exempt__";

/// Every action the coordinator understands.
pub const KNOWN_ACTIONS: [&str; 7] = [
    "getCatalog",
    "getExemptDomains",
    "reportDetection",
    "reportScanComplete",
    "getCurrentResult",
    "getCallerTabId",
    "hasStateForCallerTab",
];

// =============================================================================
// Requests
// =============================================================================

/// A detection produced by a page agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    /// Provider name, or [`EXEMPT_SENTINEL`]
    pub provider: String,
    pub tab_id: TabId,
    /// Generation the agent was scanning under
    pub generation: Generation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_method: Option<MatchMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DetectionReport {
    /// Build a report from a terminal engine result. Other results are not reportable.
    pub fn from_result(result: &DetectionResult, tab_id: TabId, generation: Generation) -> Option<Self> {
        match result {
            DetectionResult::Detected {
                provider,
                match_method,
                matched_value,
            } => Some(Self {
                provider: provider.clone(),
                tab_id,
                generation,
                match_method: Some(*match_method),
                matched_value: Some(matched_value.clone()),
                url: None,
            }),
            DetectionResult::Exempt { url, .. } => Some(Self {
                provider: EXEMPT_SENTINEL.to_string(),
                tab_id,
                generation,
                match_method: None,
                matched_value: None,
                url: Some(url.clone()),
            }),
            _ => None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn is_exempt(&self) -> bool {
        self.provider == EXEMPT_SENTINEL
    }

    /// The result the coordinator stores for this report.
    pub fn to_result(&self) -> DetectionResult {
        if self.is_exempt() {
            return DetectionResult::Exempt {
                reason: "reported exempt by page agent".to_string(),
                url: self.url.clone().unwrap_or_default(),
            };
        }
        DetectionResult::Detected {
            provider: self.provider.clone(),
            match_method: self.match_method.unwrap_or(MatchMethod::HostnameToken),
            matched_value: self.matched_value.clone().unwrap_or_default(),
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.provider.trim().is_empty() {
            return Err(ProtocolError::Malformed("reportDetection: provider must not be empty".into()));
        }
        if self.tab_id < 0 {
            return Err(ProtocolError::Malformed("reportDetection: tabId must be non-negative".into()));
        }
        Ok(())
    }
}

/// A full scan that found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCompleteReport {
    pub tab_id: TabId,
    pub generation: Generation,
    pub scanned_count: usize,
}

/// Request from a page agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetCatalog,
    GetExemptDomains,
    ReportDetection(DetectionReport),
    ReportScanComplete(ScanCompleteReport),
    GetCurrentResult,
    GetCallerTabId,
    HasStateForCallerTab,
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Self::GetCatalog => "getCatalog",
            Self::GetExemptDomains => "getExemptDomains",
            Self::ReportDetection(_) => "reportDetection",
            Self::ReportScanComplete(_) => "reportScanComplete",
            Self::GetCurrentResult => "getCurrentResult",
            Self::GetCallerTabId => "getCallerTabId",
            Self::HasStateForCallerTab => "hasStateForCallerTab",
        }
    }
}

/// Who sent a request, as reported by the host messaging layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    pub tab_id: Option<TabId>,
    pub url: Option<String>,
}

impl MessageSender {
    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
            url: None,
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    MalformedRequest,
    UnknownAction,
    NoSenderTab,
    CatalogUnavailable,
    Internal,
}

/// Coordinator response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Response {
    Catalog { catalog: CatalogDocument },
    ExemptDomains { domains: Vec<String> },
    Ack { applied: bool },
    CurrentResult { result: Option<DetectionResult> },
    CallerTabId { tab_id: TabId, generation: Generation },
    HasState { has_state: bool },
    Error { code: ErrorCode, message: String },
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for inbound request validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MalformedRequest,
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
        }
    }

    pub fn into_response(self) -> Response {
        Response::error(self.code(), self.to_string())
    }
}

/// Validate the shape of an inbound message and decode it.
pub fn parse_request(value: &Value) -> Result<Request, ProtocolError> {
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("request must be a JSON object".into()))?;

    let action = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing string field 'action'".into()))?;

    if !KNOWN_ACTIONS.contains(&action) {
        return Err(ProtocolError::UnknownAction(action.to_string()));
    }

    let request: Request =
        serde_json::from_value(value.clone()).map_err(|e| ProtocolError::Malformed(format!("{}: {}", action, e)))?;

    if let Request::ReportDetection(report) = &request {
        report.validate()?;
    }

    Ok(request)
}
