//! Tab lifecycle coordinator
//!
//! Owns the per-tab state machine:
//!
//! ```text
//! Unknown -> Scanning -> { Detected | Exempt | NoneFound }
//!               ^                    |
//!               +-- navigation start-+
//! ```
//!
//! The coordinator may be torn down at any moment and rebuilt from the
//! [`StateStore`]; it keeps no state of its own apart from caches that can be
//! refilled. Every transition is written to the store before the presenter
//! or the scan dispatcher sees it. Read-modify-write cycles on one tab are
//! serialized by [`TabLocks`]; different tabs proceed concurrently.

use std::sync::Arc;

use psp_core::protocol::{MessageSender, ScanCompleteReport};
use psp_core::url::{has_scheme_in, is_valid_url};
use psp_core::{
    DetectionReport, DetectionResult, ErrorCode, ExemptMatcher, Generation, ProviderCatalog, Request, Response,
    TabId,
};
use tokio::sync::{Mutex, OnceCell};

use crate::config::CoordinatorConfig;
use crate::effects::{LogEffects, Presenter, ScanDispatcher};
use crate::error::CoordinatorError;
use crate::loader::{self, ResourceLoader};
use crate::locks::TabLocks;
use crate::state::{CoordinatorProcessState, StateRepository, TabPhase, TabState};
use crate::store::StateStore;

/// Loaded exempt list plus its compiled matcher.
#[derive(Debug, Clone, Default)]
struct ExemptPolicy {
    domains: Vec<String>,
    matcher: ExemptMatcher,
}

impl ExemptPolicy {
    fn new(domains: Vec<String>) -> Self {
        let matcher = ExemptMatcher::from_domains(&domains);
        Self { domains, matcher }
    }
}

/// Whether a page may be scanned.
#[derive(Debug)]
enum Scope {
    Eligible,
    Exempt(DetectionResult),
}

pub struct Coordinator {
    repo: StateRepository,
    loader: Arc<dyn ResourceLoader>,
    presenter: Arc<dyn Presenter>,
    dispatcher: Arc<dyn ScanDispatcher>,
    config: CoordinatorConfig,
    locks: TabLocks,
    active_lock: Mutex<()>,
    catalog: OnceCell<Arc<ProviderCatalog>>,
    exempt: OnceCell<ExemptPolicy>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn StateStore>, loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            repo: StateRepository::new(store),
            loader,
            presenter: Arc::new(LogEffects),
            dispatcher: Arc::new(LogEffects),
            config: CoordinatorConfig::default(),
            locks: TabLocks::new(),
            active_lock: Mutex::new(()),
            catalog: OnceCell::new(),
            exempt: OnceCell::new(),
        }
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ScanDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Snapshot of everything persisted.
    pub async fn process_state(&self) -> Result<CoordinatorProcessState, CoordinatorError> {
        Ok(self.repo.load().await?)
    }

    pub async fn tab_state(&self, tab_id: TabId) -> Result<Option<TabState>, CoordinatorError> {
        Ok(self.repo.tab(tab_id).await?)
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// The provider catalog: persisted copy first, then the loader.
    /// Nothing is cached on failure so the next call tries again.
    pub async fn catalog(&self) -> Result<Arc<ProviderCatalog>, CoordinatorError> {
        self.catalog
            .get_or_try_init(|| async {
                if let Some(document) = self.repo.catalog().await? {
                    match ProviderCatalog::from_document(document) {
                        Ok(catalog) => return Ok(Arc::new(catalog)),
                        Err(e) => log::warn!("persisted catalog is invalid, refetching: {}", e),
                    }
                }
                let catalog = loader::load_catalog(self.loader.as_ref(), self.config.fetch_timeout()).await?;
                self.repo.put_catalog(catalog.document()).await?;
                Ok::<_, CoordinatorError>(Arc::new(catalog))
            })
            .await
            .map(Arc::clone)
    }

    async fn load_exempt_policy(&self) -> Result<ExemptPolicy, CoordinatorError> {
        if let Some(domains) = self.repo.exempt_domains().await? {
            return Ok(ExemptPolicy::new(domains));
        }
        let list = loader::load_exempt_domains(self.loader.as_ref(), self.config.fetch_timeout()).await?;
        self.repo.put_exempt_domains(list.domains()).await?;
        Ok(ExemptPolicy::new(list.exempt_domains))
    }

    /// The exempt policy. A failed load counts as an empty list.
    async fn exempt_policy(&self) -> ExemptPolicy {
        match self.exempt.get_or_try_init(|| self.load_exempt_policy()).await {
            Ok(policy) => policy.clone(),
            Err(e) => {
                log::warn!("exempt domains unavailable, treating list as empty: {}", e);
                ExemptPolicy::default()
            }
        }
    }

    pub async fn exempt_domains(&self) -> Vec<String> {
        self.exempt_policy().await.domains
    }

    async fn scope(&self, url: &str) -> Scope {
        if !is_valid_url(url) || !has_scheme_in(url, &self.config.eligible_schemes) {
            return Scope::Exempt(DetectionResult::Exempt {
                reason: "page is not eligible for scanning".to_string(),
                url: url.to_string(),
            });
        }
        let policy = self.exempt_policy().await;
        match policy.matcher.match_url(url) {
            Some(entry) => Scope::Exempt(DetectionResult::Exempt {
                reason: format!("host matches exempt domain '{}'", entry),
                url: url.to_string(),
            }),
            None => Scope::Eligible,
        }
    }

    async fn is_active(&self, tab_id: TabId) -> Result<bool, CoordinatorError> {
        Ok(self.repo.active_tab().await? == Some(tab_id))
    }

    // =========================================================================
    // Tab events
    // =========================================================================

    /// A tab became the active tab.
    pub async fn on_tab_activated(&self, tab_id: TabId, url: Option<&str>) -> Result<(), CoordinatorError> {
        {
            let _active = self.active_lock.lock().await;
            self.repo.set_active_tab(Some(tab_id)).await?;
        }

        let _guard = self.locks.acquire(tab_id).await;
        if let Some(state) = self.repo.tab(tab_id).await? {
            log::debug!("tab {} activated in phase {:?}", tab_id, state.phase);
            self.presenter.present(tab_id, state.result.as_ref()).await;
            return Ok(());
        }

        let Some(url) = url else {
            self.presenter.present(tab_id, None).await;
            return Ok(());
        };

        match self.scope(url).await {
            Scope::Eligible => {
                let state = TabState::new(tab_id, Some(url));
                self.repo.put_tab(&state).await?;
                log::debug!("tab {} activated, scanning {}", tab_id, url);
                self.presenter.present(tab_id, None).await;
                self.dispatcher.request_scan(tab_id, state.generation, url).await;
            }
            Scope::Exempt(result) => {
                let mut state = TabState::new(tab_id, Some(url));
                state.apply(result);
                self.repo.put_tab(&state).await?;
                log::debug!("tab {} activated on exempt page {}", tab_id, url);
                self.presenter.present(tab_id, state.result.as_ref()).await;
            }
        }
        Ok(())
    }

    /// A tab began loading a new page. Reports from the previous page become stale.
    pub async fn on_navigation_started(&self, tab_id: TabId, url: Option<&str>) -> Result<(), CoordinatorError> {
        let _guard = self.locks.acquire(tab_id).await;
        let mut state = self
            .repo
            .tab(tab_id)
            .await?
            .unwrap_or_else(|| TabState::new(tab_id, url));
        state.begin_navigation(url);
        self.repo.put_tab(&state).await?;
        log::debug!("tab {} navigating, generation {}", tab_id, state.generation);

        if self.is_active(tab_id).await? {
            self.presenter.present(tab_id, None).await;
        }
        Ok(())
    }

    /// A tab finished loading `url`.
    pub async fn on_navigation_completed(&self, tab_id: TabId, url: &str) -> Result<(), CoordinatorError> {
        let _guard = self.locks.acquire(tab_id).await;
        let mut state = self
            .repo
            .tab(tab_id)
            .await?
            .unwrap_or_else(|| TabState::new(tab_id, Some(url)));
        state.url = Some(url.to_string());

        match self.scope(url).await {
            Scope::Exempt(result) => {
                state.apply(result);
                self.repo.put_tab(&state).await?;
                log::debug!("tab {} completed on exempt page {}", tab_id, url);
                if self.is_active(tab_id).await? {
                    self.presenter.present(tab_id, state.result.as_ref()).await;
                }
            }
            Scope::Eligible if state.is_terminal() => {
                self.repo.put_tab(&state).await?;
                log::debug!("tab {} already settled for generation {}", tab_id, state.generation);
            }
            Scope::Eligible => {
                state.phase = TabPhase::Scanning;
                self.repo.put_tab(&state).await?;
                self.dispatcher.request_scan(tab_id, state.generation, url).await;
            }
        }
        Ok(())
    }

    /// A tab was closed.
    pub async fn on_tab_removed(&self, tab_id: TabId) -> Result<(), CoordinatorError> {
        {
            let _guard = self.locks.acquire(tab_id).await;
            self.repo.remove_tab(tab_id).await?;
        }
        {
            let _active = self.active_lock.lock().await;
            if self.repo.active_tab().await? == Some(tab_id) {
                self.repo.set_active_tab(None).await?;
            }
        }
        self.locks.forget(tab_id);
        log::debug!("tab {} removed", tab_id);
        Ok(())
    }

    // =========================================================================
    // Protocol
    // =========================================================================

    /// Answer one decoded request. Never fails; internal errors become
    /// `Response::Error`.
    pub async fn handle(&self, sender: &MessageSender, request: Request) -> Response {
        let action = request.action();
        let result = match request {
            Request::GetCatalog => self.handle_get_catalog().await,
            Request::GetExemptDomains => Ok(Response::ExemptDomains {
                domains: self.exempt_domains().await,
            }),
            Request::ReportDetection(report) => self.handle_report(sender, report).await,
            Request::ReportScanComplete(report) => self.handle_scan_complete(sender, report).await,
            Request::GetCurrentResult => self.handle_current_result(sender).await,
            Request::GetCallerTabId => self.handle_caller_tab_id(sender).await,
            Request::HasStateForCallerTab => self.handle_has_state(sender).await,
        };
        result.unwrap_or_else(|e| {
            log::error!("{} failed: {}", action, e);
            Response::error(ErrorCode::Internal, e.to_string())
        })
    }

    async fn handle_get_catalog(&self) -> Result<Response, CoordinatorError> {
        match self.catalog().await {
            Ok(catalog) => Ok(Response::Catalog {
                catalog: catalog.document().clone(),
            }),
            Err(e) => {
                log::warn!("catalog unavailable: {}", e);
                Ok(Response::error(ErrorCode::CatalogUnavailable, e.to_string()))
            }
        }
    }

    /// The sender may report for its own tab, or for any tab while it is the
    /// active one.
    async fn may_report(&self, sender: &MessageSender, tab_id: TabId) -> Result<Option<Response>, CoordinatorError> {
        let Some(sender_tab) = sender.tab_id else {
            return Ok(Some(no_sender_tab()));
        };
        if sender_tab == tab_id || self.is_active(sender_tab).await? {
            return Ok(None);
        }
        log::debug!("ignoring report for tab {} from inactive tab {}", tab_id, sender_tab);
        Ok(Some(Response::Ack { applied: false }))
    }

    /// State for a reporting tab. A live tab the coordinator has no record of
    /// is adopted at generation 0, which is what `GetCallerTabId` told its
    /// agent, but only when the tab reports for itself. Closed tabs stay closed.
    async fn known_or_recovered(
        &self,
        sender: &MessageSender,
        tab_id: TabId,
        generation: Generation,
        url: Option<&str>,
    ) -> Result<Option<TabState>, CoordinatorError> {
        if let Some(state) = self.repo.tab(tab_id).await? {
            return Ok(Some(state));
        }
        if generation != 0 || sender.tab_id != Some(tab_id) {
            return Ok(None);
        }
        if self.repo.is_removed(tab_id).await? {
            log::debug!("report for closed tab {}", tab_id);
            return Ok(None);
        }
        log::debug!("adopting tab {} with no stored state", tab_id);
        Ok(Some(TabState::new(tab_id, url)))
    }

    async fn handle_report(&self, sender: &MessageSender, report: DetectionReport) -> Result<Response, CoordinatorError> {
        if let Some(rejected) = self.may_report(sender, report.tab_id).await? {
            return Ok(rejected);
        }

        let tab_id = report.tab_id;
        let _guard = self.locks.acquire(tab_id).await;
        let Some(mut state) = self.known_or_recovered(sender, tab_id, report.generation, report.url.as_deref()).await? else {
            log::debug!("report for unknown tab {} at generation {}", tab_id, report.generation);
            return Ok(Response::Ack { applied: false });
        };
        if state.generation != report.generation {
            log::debug!(
                "stale report for tab {}: generation {} != {}",
                tab_id,
                report.generation,
                state.generation
            );
            return Ok(Response::Ack { applied: false });
        }
        if state.is_terminal() {
            log::debug!("tab {} already settled, ignoring {}", tab_id, report.provider);
            return Ok(Response::Ack { applied: false });
        }

        state.apply(report.to_result());
        self.repo.put_tab(&state).await?;
        log::debug!("tab {} -> {:?} ({})", tab_id, state.phase, report.provider);

        if self.is_active(tab_id).await? {
            self.presenter.present(tab_id, state.result.as_ref()).await;
        }
        Ok(Response::Ack { applied: true })
    }

    async fn handle_scan_complete(
        &self,
        sender: &MessageSender,
        report: ScanCompleteReport,
    ) -> Result<Response, CoordinatorError> {
        if let Some(rejected) = self.may_report(sender, report.tab_id).await? {
            return Ok(rejected);
        }

        let tab_id = report.tab_id;
        let _guard = self.locks.acquire(tab_id).await;
        let Some(mut state) = self.known_or_recovered(sender, tab_id, report.generation, None).await? else {
            return Ok(Response::Ack { applied: false });
        };
        if state.generation != report.generation || state.is_terminal() {
            return Ok(Response::Ack { applied: false });
        }

        state.apply(DetectionResult::None {
            scanned_count: report.scanned_count,
        });
        self.repo.put_tab(&state).await?;

        if self.is_active(tab_id).await? {
            self.presenter.present(tab_id, state.result.as_ref()).await;
        }
        Ok(Response::Ack { applied: true })
    }

    /// Result for the sender's tab, or the active tab for senders outside a tab.
    async fn handle_current_result(&self, sender: &MessageSender) -> Result<Response, CoordinatorError> {
        let tab_id = match sender.tab_id {
            Some(id) => Some(id),
            None => self.repo.active_tab().await?,
        };
        let result = match tab_id {
            Some(id) => self.repo.tab(id).await?.and_then(|s| s.result),
            None => None,
        };
        Ok(Response::CurrentResult { result })
    }

    async fn handle_caller_tab_id(&self, sender: &MessageSender) -> Result<Response, CoordinatorError> {
        let Some(tab_id) = sender.tab_id else {
            return Ok(no_sender_tab());
        };
        let generation = self.repo.tab(tab_id).await?.map(|s| s.generation).unwrap_or(0);
        Ok(Response::CallerTabId { tab_id, generation })
    }

    async fn handle_has_state(&self, sender: &MessageSender) -> Result<Response, CoordinatorError> {
        let Some(tab_id) = sender.tab_id else {
            return Ok(no_sender_tab());
        };
        let has_state = self.repo.tab(tab_id).await?.is_some();
        Ok(Response::HasState { has_state })
    }
}

fn no_sender_tab() -> Response {
    Response::error(ErrorCode::NoSenderTab, "message did not come from a tab")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::loader::{Resource, StaticLoader};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use psp_core::MatchMethod;
    use std::sync::Mutex as StdMutex;

    pub(crate) const CATALOG: &str = r#"{
        "psps": [
            { "name": "Stripe", "url": "https://stripe.com", "image": "stripe.png",
              "summary": "Stripe payments", "hostnames": ["js.stripe.com", "checkout.stripe.com"] },
            { "name": "PayPal", "url": "https://paypal.com", "image": "paypal.png",
              "summary": "PayPal payments", "hostnames": ["paypal.com"] }
        ]
    }"#;

    pub(crate) const EXEMPT: &str = r#"{"exemptDomains": ["example.com"]}"#;

    pub(crate) fn loader() -> Arc<StaticLoader> {
        Arc::new(
            StaticLoader::new()
                .with(Resource::Catalog, CATALOG)
                .with(Resource::ExemptDomains, EXEMPT),
        )
    }

    #[derive(Default)]
    pub(crate) struct Recorder {
        pub presented: StdMutex<Vec<(TabId, Option<DetectionResult>)>>,
        pub scans: StdMutex<Vec<(TabId, Generation, String)>>,
    }

    impl Recorder {
        pub fn presented(&self) -> Vec<(TabId, Option<DetectionResult>)> {
            self.presented.lock().unwrap().clone()
        }

        pub fn scans(&self) -> Vec<(TabId, Generation, String)> {
            self.scans.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Presenter for Recorder {
        async fn present(&self, tab_id: TabId, result: Option<&DetectionResult>) {
            self.presented.lock().unwrap().push((tab_id, result.cloned()));
        }
    }

    #[async_trait]
    impl ScanDispatcher for Recorder {
        async fn request_scan(&self, tab_id: TabId, generation: Generation, url: &str) {
            self.scans.lock().unwrap().push((tab_id, generation, url.to_string()));
        }
    }

    struct Failing;

    #[async_trait]
    impl ResourceLoader for Failing {
        async fn fetch(&self, resource: Resource) -> Result<String, LoadError> {
            Err(LoadError::NotConfigured(resource.as_str()))
        }
    }

    fn coordinator(store: &MemoryStore, recorder: &Arc<Recorder>) -> Coordinator {
        Coordinator::new(Arc::new(store.clone()), loader())
            .with_presenter(recorder.clone())
            .with_dispatcher(recorder.clone())
    }

    fn report(provider: &str, tab_id: TabId, generation: Generation) -> DetectionReport {
        let result = DetectionResult::detected(provider, MatchMethod::HostnameToken, "js.stripe.com");
        DetectionReport::from_result(&result, tab_id, generation).unwrap()
    }

    fn applied(response: Response) -> bool {
        match response {
            Response::Ack { applied } => applied,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_activation_of_unknown_tab_starts_scan() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_tab_activated(1, Some("https://shop.test/checkout")).await.unwrap();

        let state = c.tab_state(1).await.unwrap().unwrap();
        assert_eq!(state.phase, TabPhase::Scanning);
        assert_eq!(state.generation, 0);
        assert_eq!(recorder.scans(), vec![(1, 0, "https://shop.test/checkout".to_string())]);
        assert_eq!(recorder.presented(), vec![(1, None)]);
    }

    #[tokio::test]
    async fn test_activation_reapplies_existing_result() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();
        assert!(applied(c.handle(&MessageSender::tab(1), Request::ReportDetection(report("Stripe", 1, 0))).await));

        c.on_tab_activated(2, None).await.unwrap();
        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();

        assert_eq!(recorder.scans().len(), 1);
        let (tab, last) = recorder.presented().pop().unwrap();
        assert_eq!(tab, 1);
        assert_eq!(last.unwrap().provider(), Some("Stripe"));
    }

    #[tokio::test]
    async fn test_exempt_and_ineligible_pages() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_tab_activated(1, Some("https://www.example.com/pay")).await.unwrap();
        let state = c.tab_state(1).await.unwrap().unwrap();
        assert_eq!(state.phase, TabPhase::Exempt);

        c.on_tab_activated(2, Some("chrome://settings")).await.unwrap();
        assert_eq!(c.tab_state(2).await.unwrap().unwrap().phase, TabPhase::Exempt);

        assert!(recorder.scans().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_complete_on_exempt_url() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_navigation_started(3, Some("https://docs.example.com")).await.unwrap();
        c.on_navigation_completed(3, "https://docs.example.com").await.unwrap();

        let state = c.tab_state(3).await.unwrap().unwrap();
        assert_eq!(state.phase, TabPhase::Exempt);
        assert!(matches!(state.result, Some(DetectionResult::Exempt { .. })));
        assert!(recorder.scans().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_stale_reports_are_ignored() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);
        let sender = MessageSender::tab(1);

        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();
        assert!(applied(c.handle(&sender, Request::ReportDetection(report("Stripe", 1, 0))).await));
        assert!(!applied(c.handle(&sender, Request::ReportDetection(report("PayPal", 1, 0))).await));

        let state = c.tab_state(1).await.unwrap().unwrap();
        assert_eq!(state.result.as_ref().and_then(|r| r.provider()), Some("Stripe"));

        c.on_navigation_started(1, Some("https://shop.test/next")).await.unwrap();
        assert!(!applied(c.handle(&sender, Request::ReportDetection(report("PayPal", 1, 0))).await));
        assert!(applied(c.handle(&sender, Request::ReportDetection(report("PayPal", 1, 1))).await));
    }

    #[tokio::test]
    async fn test_navigation_clears_result() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();
        c.handle(&MessageSender::tab(1), Request::ReportDetection(report("Stripe", 1, 0)))
            .await;

        c.on_navigation_started(1, Some("https://other.test")).await.unwrap();
        let state = c.tab_state(1).await.unwrap().unwrap();
        assert_eq!(state.generation, 1);
        assert_eq!(state.result, None);
        assert_eq!(state.phase, TabPhase::Scanning);
        assert_eq!(recorder.presented().last(), Some(&(1, None)));

        c.on_navigation_completed(1, "https://other.test").await.unwrap();
        assert_eq!(recorder.scans().last(), Some(&(1, 1, "https://other.test".to_string())));
    }

    #[tokio::test]
    async fn test_restart_between_scan_and_report() {
        let store = MemoryStore::new();
        let first = Arc::new(Recorder::default());
        let c = coordinator(&store, &first);
        c.on_tab_activated(4, Some("https://shop.test")).await.unwrap();
        drop(c);

        let second = Arc::new(Recorder::default());
        let c = coordinator(&store, &second);
        let response = c
            .handle(&MessageSender::tab(4), Request::ReportDetection(report("Stripe", 4, 0)))
            .await;
        assert!(applied(response));

        let presented = second.presented();
        assert_eq!(presented.len(), 1);
        assert_eq!(presented[0].1.as_ref().and_then(|r| r.provider()), Some("Stripe"));
        assert_eq!(c.process_state().await.unwrap().active_tab_id, Some(4));
    }

    #[tokio::test]
    async fn test_report_for_forgotten_tab() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);
        let sender = MessageSender::tab(6);

        assert!(!applied(c.handle(&sender, Request::ReportDetection(report("Stripe", 6, 3))).await));
        assert!(c.tab_state(6).await.unwrap().is_none());

        assert!(applied(c.handle(&sender, Request::ReportDetection(report("Stripe", 6, 0))).await));
        let state = c.tab_state(6).await.unwrap().unwrap();
        assert_eq!(state.phase, TabPhase::Detected);
        assert_eq!(state.generation, 0);
    }

    #[tokio::test]
    async fn test_active_tab_cannot_create_unknown_tab() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);
        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();

        let response = c
            .handle(&MessageSender::tab(1), Request::ReportDetection(report("Stripe", 999, 0)))
            .await;
        assert!(!applied(response));
        let complete = ScanCompleteReport {
            tab_id: 999,
            generation: 0,
            scanned_count: 1,
        };
        assert!(!applied(c.handle(&MessageSender::tab(1), Request::ReportScanComplete(complete)).await));

        assert!(c.tab_state(999).await.unwrap().is_none());
        assert_eq!(c.process_state().await.unwrap().tab_states.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_late_report_after_removal_is_ignored() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);
        let sender = MessageSender::tab(2);

        c.on_tab_activated(2, Some("https://shop.test")).await.unwrap();
        c.on_tab_removed(2).await.unwrap();

        assert!(!applied(c.handle(&sender, Request::ReportDetection(report("Stripe", 2, 0))).await));
        let complete = ScanCompleteReport {
            tab_id: 2,
            generation: 0,
            scanned_count: 1,
        };
        assert!(!applied(c.handle(&sender, Request::ReportScanComplete(complete)).await));
        assert!(c.process_state().await.unwrap().tab_states.is_empty());

        // Still closed after a restart
        let c = coordinator(&store, &recorder);
        assert!(!applied(c.handle(&sender, Request::ReportDetection(report("Stripe", 2, 0))).await));
        assert!(c.tab_state(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_report_authorization() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_navigation_started(7, Some("https://shop.test")).await.unwrap();
        c.on_tab_activated(1, Some("https://a.test")).await.unwrap();

        let response = c
            .handle(&MessageSender::default(), Request::ReportDetection(report("Stripe", 7, 1)))
            .await;
        assert!(matches!(response, Response::Error { code: ErrorCode::NoSenderTab, .. }));

        // Neither the active tab nor the tab being reported
        let response = c
            .handle(&MessageSender::tab(9), Request::ReportDetection(report("Stripe", 7, 1)))
            .await;
        assert!(!applied(response));

        // Active tab may report for another tab
        let response = c
            .handle(&MessageSender::tab(1), Request::ReportDetection(report("Stripe", 7, 1)))
            .await;
        assert!(applied(response));
    }

    #[tokio::test]
    async fn test_scan_complete_then_detection() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);
        let sender = MessageSender::tab(1);

        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();
        let complete = ScanCompleteReport {
            tab_id: 1,
            generation: 0,
            scanned_count: 2,
        };
        assert!(applied(c.handle(&sender, Request::ReportScanComplete(complete)).await));
        assert_eq!(c.tab_state(1).await.unwrap().unwrap().phase, TabPhase::NoneFound);

        assert!(applied(c.handle(&sender, Request::ReportDetection(report("PayPal", 1, 0))).await));
        assert_eq!(c.tab_state(1).await.unwrap().unwrap().phase, TabPhase::Detected);
        assert!(!applied(c.handle(&sender, Request::ReportScanComplete(complete)).await));
    }

    #[tokio::test]
    async fn test_tab_removal() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();
        c.on_tab_removed(1).await.unwrap();

        let state = c.process_state().await.unwrap();
        assert_eq!(state.active_tab_id, None);
        assert!(state.tab_states.is_empty());

        let response = c.handle(&MessageSender::tab(1), Request::HasStateForCallerTab).await;
        assert_eq!(response, Response::HasState { has_state: false });
    }

    #[tokio::test]
    async fn test_caller_queries() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        c.on_navigation_started(5, Some("https://shop.test")).await.unwrap();
        c.on_navigation_started(5, Some("https://shop.test/cart")).await.unwrap();

        let sender = MessageSender::tab(5);
        assert_eq!(
            c.handle(&sender, Request::GetCallerTabId).await,
            Response::CallerTabId { tab_id: 5, generation: 2 }
        );
        assert_eq!(
            c.handle(&sender, Request::HasStateForCallerTab).await,
            Response::HasState { has_state: true }
        );
        assert_eq!(
            c.handle(&sender, Request::GetCurrentResult).await,
            Response::CurrentResult { result: None }
        );
        assert!(c.handle(&MessageSender::default(), Request::GetCallerTabId).await.is_error());
    }

    #[tokio::test]
    async fn test_resources_are_cached_and_persisted() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = coordinator(&store, &recorder);

        match c.handle(&MessageSender::tab(1), Request::GetCatalog).await {
            Response::Catalog { catalog } => assert_eq!(catalog.psps.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(c.exempt_domains().await, vec!["example.com".to_string()]);

        // A restarted coordinator with no reachable source still has the copies
        let c = Coordinator::new(Arc::new(store.clone()), Arc::new(Failing));
        assert_eq!(c.catalog().await.unwrap().len(), 2);
        assert_eq!(c.exempt_domains().await, vec!["example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_resource_failures() {
        let c = Coordinator::new(Arc::new(MemoryStore::new()), Arc::new(Failing));

        let response = c.handle(&MessageSender::tab(1), Request::GetCatalog).await;
        assert!(matches!(response, Response::Error { code: ErrorCode::CatalogUnavailable, .. }));

        // Exempt list fails open
        assert_eq!(
            c.handle(&MessageSender::tab(1), Request::GetExemptDomains).await,
            Response::ExemptDomains { domains: vec![] }
        );
    }

    #[tokio::test]
    async fn test_concurrent_reports_for_one_tab() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let c = Arc::new(coordinator(&store, &recorder));
        c.on_tab_activated(1, Some("https://shop.test")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let c = Arc::clone(&c);
            handles.push(tokio::spawn(async move {
                let report = report(&format!("Provider{i}"), 1, 0);
                applied(c.handle(&MessageSender::tab(1), Request::ReportDetection(report)).await)
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
