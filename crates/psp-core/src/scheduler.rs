//! Scan scheduling for page agents
//!
//! Pages mutate constantly; only some mutations can introduce a new payment
//! signature. `ScanScheduler` turns a stream of structural-change events into
//! detection attempts using two explicit timers:
//!
//! - **debounce**: an attempt fires only after `debounce_ms` without further
//!   relevant mutations
//! - **cooldown**: two attempts are never closer than `cooldown_ms`
//!
//! Once a terminal result is recorded the scheduler stops for the rest of the
//! page load. Time is passed in as milliseconds from any monotonic origin the
//! host chooses, so the scheduler runs unchanged inside wasm.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::CollectorConfig;
use crate::protocol::EXEMPT_SENTINEL;
use crate::types::DetectionResult;

/// Element names whose insertion can add a scannable reference.
pub const SCANNABLE_TAGS: [&str; 4] = ["script", "iframe", "frame", "form"];

// =============================================================================
// Mutations
// =============================================================================

/// A node inserted into the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddedNode {
    pub tag: String,
    /// The inserted subtree contains a scannable element
    pub contains_scannable: bool,
}

impl AddedNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            contains_scannable: false,
        }
    }

    fn is_scannable(&self) -> bool {
        self.contains_scannable || SCANNABLE_TAGS.iter().any(|t| t.eq_ignore_ascii_case(&self.tag))
    }
}

/// One batch of mutation records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Mutation {
    pub added_nodes: Vec<AddedNode>,
}

impl Mutation {
    pub fn new(added_nodes: Vec<AddedNode>) -> Self {
        Self { added_nodes }
    }

    /// Whether this batch plausibly adds scannable structure.
    pub fn is_structural(&self) -> bool {
        self.added_nodes.iter().any(AddedNode::is_scannable)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Debounce/cooldown state for one page load.
#[derive(Debug, Clone)]
pub struct ScanScheduler {
    config: CollectorConfig,
    last_mutation: Option<u64>,
    last_attempt: Option<u64>,
    stopped: bool,
}

impl ScanScheduler {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            last_mutation: None,
            last_attempt: None,
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn has_pending(&self) -> bool {
        !self.stopped && self.last_mutation.is_some()
    }

    /// Feed a mutation batch. Returns true when it (re)armed the debounce timer.
    pub fn on_mutation(&mut self, mutation: &Mutation, now_ms: u64) -> bool {
        if self.stopped || !mutation.is_structural() {
            return false;
        }
        self.last_mutation = Some(now_ms);
        true
    }

    fn cooldown_ready_at(&self) -> u64 {
        self.last_attempt
            .map(|t| t.saturating_add(self.config.cooldown_ms))
            .unwrap_or(0)
    }

    /// When the host should call `poll` next, if anything is pending.
    pub fn next_deadline(&self) -> Option<u64> {
        if self.stopped {
            return None;
        }
        let quiet_at = self.last_mutation?.saturating_add(self.config.debounce_ms);
        Some(quiet_at.max(self.cooldown_ready_at()))
    }

    /// Returns true when a pending rescan is due; the attempt is recorded.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.next_deadline() {
            Some(deadline) if deadline <= now_ms => {
                self.last_mutation = None;
                self.last_attempt = Some(now_ms);
                true
            }
            _ => false,
        }
    }

    /// Start an immediate attempt (initial scan, coordinator request) if the
    /// cooldown allows it.
    pub fn try_begin(&mut self, now_ms: u64) -> bool {
        if self.stopped || (self.last_attempt.is_some() && now_ms < self.cooldown_ready_at()) {
            return false;
        }
        self.last_attempt = Some(now_ms);
        true
    }

    /// Record the outcome of an attempt. Terminal results stop observation.
    pub fn record_result(&mut self, result: &DetectionResult) {
        if result.is_terminal() {
            self.stopped = true;
            self.last_mutation = None;
        }
    }

    /// New page load.
    pub fn reset(&mut self) {
        self.last_mutation = None;
        self.last_attempt = None;
        self.stopped = false;
    }
}

// =============================================================================
// Report Gate
// =============================================================================

/// Suppresses repeated outward reports within one page load.
#[derive(Debug, Clone, Default)]
pub struct ReportGate {
    reported: HashSet<String>,
}

impl ReportGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(result: &DetectionResult) -> Option<String> {
        match result {
            DetectionResult::Detected { provider, .. } => Some(provider.to_ascii_lowercase()),
            DetectionResult::Exempt { .. } => Some(EXEMPT_SENTINEL.to_string()),
            _ => None,
        }
    }

    /// True the first time a reportable result is seen.
    pub fn admit(&mut self, result: &DetectionResult) -> bool {
        match Self::key(result) {
            Some(key) => self.reported.insert(key),
            None => false,
        }
    }

    /// Undo an `admit` whose report never reached the coordinator.
    pub fn revoke(&mut self, result: &DetectionResult) {
        if let Some(key) = Self::key(result) {
            self.reported.remove(&key);
        }
    }

    pub fn reset(&mut self) {
        self.reported.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchMethod;

    fn script_added() -> Mutation {
        Mutation::new(vec![AddedNode::new("SCRIPT")])
    }

    fn config() -> CollectorConfig {
        CollectorConfig {
            debounce_ms: 1_000,
            cooldown_ms: 3_000,
            max_nested_frames: 10,
        }
    }

    #[test]
    fn test_irrelevant_mutations_are_ignored() {
        let mut s = ScanScheduler::new(config());
        let m = Mutation::new(vec![AddedNode::new("div"), AddedNode::new("span")]);
        assert!(!s.on_mutation(&m, 0));
        assert_eq!(s.next_deadline(), None);

        let nested = Mutation::new(vec![AddedNode {
            tag: "div".into(),
            contains_scannable: true,
        }]);
        assert!(s.on_mutation(&nested, 0));
    }

    #[test]
    fn test_debounce_rearms_on_each_mutation() {
        let mut s = ScanScheduler::new(config());
        s.on_mutation(&script_added(), 0);
        s.on_mutation(&script_added(), 800);
        assert_eq!(s.next_deadline(), Some(1_800));
        assert!(!s.poll(1_000));
        assert!(s.poll(1_800));
        assert!(!s.has_pending());
    }

    #[test]
    fn test_cooldown_delays_attempt() {
        let mut s = ScanScheduler::new(config());
        assert!(s.try_begin(0));
        s.on_mutation(&script_added(), 100);
        // quiet at 1_100 but cooldown until 3_000
        assert_eq!(s.next_deadline(), Some(3_000));
        assert!(!s.poll(1_100));
        assert!(s.poll(3_000));
        assert!(!s.try_begin(4_000));
        assert!(s.try_begin(6_000));
    }

    #[test]
    fn test_terminal_result_stops_observation() {
        let mut s = ScanScheduler::new(config());
        s.record_result(&DetectionResult::None { scanned_count: 2 });
        assert!(!s.is_stopped());

        s.record_result(&DetectionResult::detected("Stripe", MatchMethod::HostnameToken, "js.stripe.com"));
        assert!(s.is_stopped());
        assert!(!s.on_mutation(&script_added(), 10));
        assert!(!s.try_begin(100_000));

        s.reset();
        assert!(!s.is_stopped());
        assert!(s.try_begin(0));
    }

    #[test]
    fn test_report_gate_dedupes() {
        let mut gate = ReportGate::new();
        let stripe = DetectionResult::detected("Stripe", MatchMethod::HostnameToken, "js.stripe.com");
        assert!(gate.admit(&stripe));
        assert!(!gate.admit(&DetectionResult::detected("stripe", MatchMethod::Pattern, "stripe")));

        let exempt = DetectionResult::Exempt {
            reason: "r".into(),
            url: "https://example.com".into(),
        };
        assert!(gate.admit(&exempt));
        assert!(!gate.admit(&exempt));
        assert!(!gate.admit(&DetectionResult::None { scanned_count: 1 }));

        gate.reset();
        assert!(gate.admit(&stripe));
    }

    #[test]
    fn test_report_gate_revoke_allows_resend() {
        let mut gate = ReportGate::new();
        let adyen = DetectionResult::detected("Adyen", MatchMethod::Pattern, "adyen.com");
        assert!(gate.admit(&adyen));
        gate.revoke(&adyen);
        assert!(gate.admit(&adyen));
    }
}
