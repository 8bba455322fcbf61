//! Page agent
//!
//! Runs inside one page. Detection itself is synchronous and happens locally
//! against the catalog fetched from the coordinator; the coordinator only
//! hears about terminal results (once per provider per page load) and about
//! scans that found nothing. If the coordinator is unreachable the agent keeps
//! its local result and carries on.

use std::sync::Arc;

use psp_core::protocol::ScanCompleteReport;
use psp_core::{
    collect_corpus, CollectorConfig, DetectionReport, DetectionResult, Engine, ExemptMatcher, Generation, Mutation,
    PageDocument, ProviderCatalog, ReportGate, ScanScheduler, TabId,
};

use crate::client::ProtocolClient;
use crate::error::{AgentError, ClientError};
use crate::transport::Transport;

pub struct PageAgent<T> {
    client: ProtocolClient<T>,
    config: CollectorConfig,
    engine: Engine,
    scheduler: ScanScheduler,
    gate: ReportGate,
    tab_id: Option<TabId>,
    generation: Generation,
    last_result: Option<DetectionResult>,
}

impl<T: Transport> PageAgent<T> {
    pub fn new(transport: T, config: CollectorConfig) -> Self {
        Self {
            client: ProtocolClient::new(transport),
            scheduler: ScanScheduler::new(config),
            config,
            engine: Engine::new(),
            gate: ReportGate::new(),
            tab_id: None,
            generation: 0,
            last_result: None,
        }
    }

    pub fn client(&self) -> &ProtocolClient<T> {
        &self.client
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_initialized()
    }

    pub fn tab_id(&self) -> Option<TabId> {
        self.tab_id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn last_result(&self) -> Option<&DetectionResult> {
        self.last_result.as_ref()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    /// Fetch the catalog and exempt list from the coordinator.
    pub async fn initialize(&mut self) -> Result<(), AgentError> {
        let document = self.client.get_catalog().await?;
        let catalog = ProviderCatalog::from_document(document)?;

        let domains = match self.client.get_exempt_domains().await {
            Ok(domains) => domains,
            Err(e) => {
                log::warn!("exempt domains unavailable, treating list as empty: {}", e);
                Vec::new()
            }
        };

        self.engine.set_catalog(Arc::new(catalog));
        self.engine.set_exempt(ExemptMatcher::from_domains(&domains));
        Ok(())
    }

    /// Learn which tab this agent runs in and the generation to report under.
    pub async fn refresh_tab(&mut self) -> Result<(TabId, Generation), ClientError> {
        let (tab_id, generation) = self.client.caller_tab().await?;
        self.tab_id = Some(tab_id);
        self.generation = generation;
        Ok((tab_id, generation))
    }

    /// First scan of a page load.
    pub async fn start(&mut self, doc: &dyn PageDocument, now_ms: u64) -> Result<Option<DetectionResult>, AgentError> {
        if !self.is_initialized() {
            self.initialize().await?;
        }
        self.refresh_tab().await?;
        if !self.scheduler.try_begin(now_ms) {
            return Ok(None);
        }
        Ok(Some(self.scan(doc).await))
    }

    /// Collect, detect and report. Always returns the local result.
    pub async fn scan(&mut self, doc: &dyn PageDocument) -> DetectionResult {
        let corpus = collect_corpus(doc, &self.config);
        let result = self.engine.detect(corpus.url(), &corpus.text());
        log::debug!(
            "scanned {} entries ({} frames): {}",
            corpus.len(),
            corpus.frames_visited(),
            result.kind()
        );

        self.scheduler.record_result(&result);
        self.report(&result, corpus.url()).await;
        self.last_result = Some(result.clone());
        result
    }

    async fn report(&mut self, result: &DetectionResult, url: &str) {
        let Some(tab_id) = self.tab_id else {
            log::debug!("tab id unknown, keeping {} result local", result.kind());
            return;
        };

        match result {
            DetectionResult::Detected { .. } | DetectionResult::Exempt { .. } => {
                if !self.gate.admit(result) {
                    return;
                }
                let Some(report) = DetectionReport::from_result(result, tab_id, self.generation) else {
                    return;
                };
                match self.client.report_detection(report.with_url(url)).await {
                    Ok(true) => {}
                    Ok(false) => log::debug!("coordinator did not apply {} report", result.kind()),
                    Err(e) => {
                        self.gate.revoke(result);
                        log_delivery_failure("detection", &e);
                    }
                }
            }
            DetectionResult::None { scanned_count } => {
                let report = ScanCompleteReport {
                    tab_id,
                    generation: self.generation,
                    scanned_count: *scanned_count,
                };
                if let Err(e) = self.client.report_scan_complete(report).await {
                    log_delivery_failure("scan-complete", &e);
                }
            }
            DetectionResult::Error { cause, .. } => {
                log::debug!("detection did not run: {}", cause);
            }
        }
    }

    /// Feed a DOM mutation batch.
    pub fn on_mutation(&mut self, mutation: &Mutation, now_ms: u64) -> bool {
        self.scheduler.on_mutation(mutation, now_ms)
    }

    /// Rescan if the debounce and cooldown timers allow it.
    pub async fn poll(&mut self, doc: &dyn PageDocument, now_ms: u64) -> Option<DetectionResult> {
        if !self.scheduler.poll(now_ms) {
            return None;
        }
        Some(self.scan(doc).await)
    }

    /// The coordinator asked for a scan under `generation`.
    pub async fn on_scan_requested(
        &mut self,
        generation: Generation,
        doc: &dyn PageDocument,
        now_ms: u64,
    ) -> Option<DetectionResult> {
        if generation != self.generation {
            self.generation = generation;
            self.begin_page_load();
        } else if self.scheduler.is_stopped() {
            // Already settled, the coordinator missed the report
            self.gate.reset();
            let result = self.last_result.clone()?;
            self.report(&result, doc.url()).await;
            return Some(result);
        }
        if !self.scheduler.try_begin(now_ms) {
            return None;
        }
        Some(self.scan(doc).await)
    }

    /// Check the coordinator still knows this tab; rescan if it forgot.
    pub async fn resync(&mut self, doc: &dyn PageDocument, now_ms: u64) -> Result<Option<DetectionResult>, AgentError> {
        let has_state = match self.client.has_state().await {
            Ok(has_state) => has_state,
            Err(e) if e.is_unavailable() => {
                log::debug!("coordinator unavailable, skipping resync");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if has_state {
            return Ok(None);
        }

        log::info!("coordinator lost state for this tab, rescanning");
        self.begin_page_load();
        self.refresh_tab().await?;
        if !self.scheduler.try_begin(now_ms) {
            return Ok(None);
        }
        Ok(Some(self.scan(doc).await))
    }

    /// The page navigated; the next `start` runs under a fresh generation.
    pub fn on_navigation(&mut self) {
        self.begin_page_load();
    }

    /// The coordinator's stored result for this tab, or `None` if it cannot be
    /// reached.
    pub async fn coordinator_result(&self) -> Option<DetectionResult> {
        match self.client.current_result().await {
            Ok(result) => result,
            Err(e) => {
                log::debug!("no result from coordinator: {}", e);
                None
            }
        }
    }

    fn begin_page_load(&mut self) {
        self.scheduler.reset();
        self.gate.reset();
        self.last_result = None;
    }
}

fn log_delivery_failure(what: &str, e: &ClientError) {
    if e.is_unavailable() {
        log::debug!("coordinator unavailable, {} report kept local", what);
    } else {
        log::warn!("{} report failed: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::coordinator::tests::{loader, Recorder};
    use crate::coordinator::Coordinator;
    use crate::retry::RetryingTransport;
    use crate::state::{tab_key, TabPhase};
    use crate::store::{MemoryStore, StateStore};
    use crate::transport::{channel, serve, ChannelTransport};
    use psp_core::protocol::MessageSender;
    use psp_core::scheduler::AddedNode;
    use psp_core::PageSnapshot;

    type Agent = PageAgent<RetryingTransport<ChannelTransport>>;

    fn setup(tab_id: TabId) -> (Arc<Coordinator>, Arc<Recorder>, Agent, tokio::task::JoinHandle<()>) {
        setup_with_store(tab_id, MemoryStore::new())
    }

    fn setup_with_store(
        tab_id: TabId,
        store: MemoryStore,
    ) -> (Arc<Coordinator>, Arc<Recorder>, Agent, tokio::task::JoinHandle<()>) {
        let recorder = Arc::new(Recorder::default());
        let coordinator = Arc::new(
            Coordinator::new(Arc::new(store), loader())
                .with_presenter(recorder.clone())
                .with_dispatcher(recorder.clone()),
        );
        let (tx, rx) = channel(16);
        let server = serve(Arc::clone(&coordinator), rx);
        let transport = RetryingTransport::new(
            ChannelTransport::new(tx, MessageSender::tab(tab_id)),
            RetryPolicy::default().with_base_delay_ms(1),
        );
        let agent = PageAgent::new(transport, CollectorConfig::default());
        (coordinator, recorder, agent, server)
    }

    fn checkout_page() -> PageSnapshot {
        let mut page = PageSnapshot::new("https://shop.test/checkout");
        page.scripts.push("https://js.stripe.com/v3/".to_string());
        page
    }

    #[tokio::test]
    async fn test_detection_reaches_coordinator() {
        let (coordinator, recorder, mut agent, _server) = setup(1);
        coordinator.on_tab_activated(1, Some("https://shop.test/checkout")).await.unwrap();

        let result = agent.start(&checkout_page(), 0).await.unwrap().unwrap();
        assert_eq!(result.provider(), Some("Stripe"));
        assert_eq!(agent.tab_id(), Some(1));

        let state = coordinator.tab_state(1).await.unwrap().unwrap();
        assert_eq!(state.phase, TabPhase::Detected);
        let (_, shown) = recorder.presented().pop().unwrap();
        assert_eq!(shown.unwrap().provider(), Some("Stripe"));

        assert_eq!(agent.coordinator_result().await.unwrap().provider(), Some("Stripe"));

        // A repeated instruction for a settled page resends instead of rescanning
        let again = agent.on_scan_requested(0, &checkout_page(), 1).await.unwrap();
        assert_eq!(again.provider(), Some("Stripe"));
    }

    #[tokio::test]
    async fn test_empty_page_reports_scan_complete() {
        let (coordinator, _recorder, mut agent, _server) = setup(2);
        coordinator.on_tab_activated(2, Some("https://blog.test")).await.unwrap();

        let result = agent.start(&PageSnapshot::new("https://blog.test"), 0).await.unwrap().unwrap();
        assert_eq!(result, DetectionResult::None { scanned_count: 2 });
        assert_eq!(coordinator.tab_state(2).await.unwrap().unwrap().phase, TabPhase::NoneFound);

        // A late script insertion is picked up after the debounce
        let mutation = Mutation::new(vec![AddedNode::new("script")]);
        assert!(agent.on_mutation(&mutation, 1_000));
        assert_eq!(agent.poll(&checkout_page(), 2_000).await, None);
        let deadline = agent.next_deadline().unwrap();
        let result = agent.poll(&checkout_page(), deadline).await.unwrap();
        assert_eq!(result.provider(), Some("Stripe"));
        assert_eq!(coordinator.tab_state(2).await.unwrap().unwrap().phase, TabPhase::Detected);
    }

    #[tokio::test]
    async fn test_navigation_generation_handshake() {
        let (coordinator, _recorder, mut agent, _server) = setup(3);
        coordinator.on_tab_activated(3, Some("https://shop.test")).await.unwrap();
        agent.start(&checkout_page(), 0).await.unwrap();

        coordinator.on_navigation_started(3, Some("https://shop.test/next")).await.unwrap();
        agent.on_navigation();
        let result = agent.start(&checkout_page(), 10_000).await.unwrap().unwrap();
        assert_eq!(agent.generation(), 1);
        assert_eq!(result.provider(), Some("Stripe"));

        let state = coordinator.tab_state(3).await.unwrap().unwrap();
        assert_eq!(state.generation, 1);
        assert_eq!(state.phase, TabPhase::Detected);
    }

    #[tokio::test]
    async fn test_resync_after_coordinator_forgets() {
        let store = MemoryStore::new();
        let (coordinator, _recorder, mut agent, _server) = setup_with_store(4, store.clone());
        coordinator.on_tab_activated(4, Some("https://shop.test")).await.unwrap();
        agent.start(&checkout_page(), 0).await.unwrap();
        assert_eq!(agent.resync(&checkout_page(), 100).await.unwrap(), None);

        // The stored state is lost while the tab stays open
        store.remove(&tab_key(4)).await.unwrap();
        let result = agent.resync(&checkout_page(), 200).await.unwrap().unwrap();
        assert_eq!(result.provider(), Some("Stripe"));
        assert_eq!(coordinator.tab_state(4).await.unwrap().unwrap().phase, TabPhase::Detected);
    }

    #[tokio::test]
    async fn test_degrades_when_coordinator_is_gone() {
        let (coordinator, _recorder, mut agent, server) = setup(5);
        coordinator.on_tab_activated(5, Some("https://shop.test")).await.unwrap();
        agent.initialize().await.unwrap();
        agent.refresh_tab().await.unwrap();

        server.abort();
        let _ = server.await;

        let result = agent.scan(&checkout_page()).await;
        assert_eq!(result.provider(), Some("Stripe"));
        assert_eq!(agent.coordinator_result().await, None);
        assert_eq!(agent.resync(&checkout_page(), 0).await.unwrap(), None);

        // An agent that never reached the coordinator cannot initialize
        let (tx, rx) = channel(1);
        drop(rx);
        let mut fresh = PageAgent::new(
            RetryingTransport::new(
                ChannelTransport::new(tx, MessageSender::tab(6)),
                RetryPolicy::default().with_base_delay_ms(1),
            ),
            CollectorConfig::default(),
        );
        let err = fresh.start(&checkout_page(), 0).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
