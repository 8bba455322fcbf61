//! Persisted coordinator state
//!
//! Key layout in the [`StateStore`]:
//!
//! | key              | value                         |
//! |------------------|-------------------------------|
//! | `activeTabId`    | tab id or absent              |
//! | `tabState:{id}`  | one [`TabState`] per live tab |
//! | `tabRemoved:{id}`| marker for a closed tab       |
//! | `catalog`        | cached catalog document       |
//! | `exemptDomains`  | cached exempt-domain list     |
//!
//! Tab states live under one key per tab so that the per-tab lock is the
//! whole critical section for a read-modify-write.

use std::collections::BTreeMap;
use std::sync::Arc;

use psp_core::{CatalogDocument, DetectionResult, Generation, TabId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::StateStore;

pub const KEY_ACTIVE_TAB: &str = "activeTabId";
pub const KEY_CATALOG: &str = "catalog";
pub const KEY_EXEMPT_DOMAINS: &str = "exemptDomains";
pub const TAB_KEY_PREFIX: &str = "tabState:";
pub const REMOVED_KEY_PREFIX: &str = "tabRemoved:";

pub fn tab_key(tab_id: TabId) -> String {
    format!("{}{}", TAB_KEY_PREFIX, tab_id)
}

pub fn removed_key(tab_id: TabId) -> String {
    format!("{}{}", REMOVED_KEY_PREFIX, tab_id)
}

// =============================================================================
// Tab State
// =============================================================================

/// Lifecycle phase of a tab. A tab without stored state is "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TabPhase {
    Scanning,
    Detected,
    Exempt,
    NoneFound,
}

impl TabPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Detected | Self::Exempt)
    }
}

/// Everything the coordinator knows about one tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    pub tab_id: TabId,
    pub phase: TabPhase,
    pub result: Option<DetectionResult>,
    pub generation: Generation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TabState {
    pub fn new(tab_id: TabId, url: Option<&str>) -> Self {
        Self {
            tab_id,
            phase: TabPhase::Scanning,
            result: None,
            generation: 0,
            url: url.map(str::to_string),
        }
    }

    /// Navigation start: new generation, result cleared.
    pub fn begin_navigation(&mut self, url: Option<&str>) {
        self.generation += 1;
        self.result = None;
        self.phase = TabPhase::Scanning;
        if let Some(url) = url {
            self.url = Some(url.to_string());
        }
    }

    /// Store a result and derive the phase from it.
    pub fn apply(&mut self, result: DetectionResult) {
        self.phase = match &result {
            DetectionResult::Detected { .. } => TabPhase::Detected,
            DetectionResult::Exempt { .. } => TabPhase::Exempt,
            DetectionResult::None { .. } => TabPhase::NoneFound,
            DetectionResult::Error { .. } => TabPhase::Scanning,
        };
        self.result = Some(result);
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

// =============================================================================
// Process State
// =============================================================================

/// Full persisted coordinator state, as reconstructed from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorProcessState {
    pub active_tab_id: Option<TabId>,
    pub tab_states: BTreeMap<TabId, TabState>,
    pub catalog: Option<CatalogDocument>,
    pub exempt_domains: Option<Vec<String>>,
}

// =============================================================================
// Repository
// =============================================================================

/// Typed access to the coordinator keys of a [`StateStore`].
#[derive(Clone)]
pub struct StateRepository {
    store: Arc<dyn StateStore>,
}

impl StateRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    async fn set_typed<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.store.set(key, serde_json::to_value(value)?).await
    }

    pub async fn active_tab(&self) -> Result<Option<TabId>, StoreError> {
        self.get_typed(KEY_ACTIVE_TAB).await
    }

    pub async fn set_active_tab(&self, tab_id: Option<TabId>) -> Result<(), StoreError> {
        match tab_id {
            Some(id) => self.set_typed(KEY_ACTIVE_TAB, &id).await,
            None => self.store.remove(KEY_ACTIVE_TAB).await,
        }
    }

    pub async fn tab(&self, tab_id: TabId) -> Result<Option<TabState>, StoreError> {
        self.get_typed(&tab_key(tab_id)).await
    }

    pub async fn put_tab(&self, state: &TabState) -> Result<(), StoreError> {
        self.set_typed(&tab_key(state.tab_id), state).await
    }

    /// Drop the tab's state and mark it closed. Tab ids are not reused, so
    /// the marker is permanent.
    pub async fn remove_tab(&self, tab_id: TabId) -> Result<(), StoreError> {
        self.set_typed(&removed_key(tab_id), &true).await?;
        self.store.remove(&tab_key(tab_id)).await
    }

    pub async fn is_removed(&self, tab_id: TabId) -> Result<bool, StoreError> {
        Ok(self.get_typed::<bool>(&removed_key(tab_id)).await?.unwrap_or(false))
    }

    pub async fn tab_ids(&self) -> Result<Vec<TabId>, StoreError> {
        let keys = self.store.keys().await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix(TAB_KEY_PREFIX))
            .filter_map(|id| id.parse().ok())
            .collect())
    }

    pub async fn catalog(&self) -> Result<Option<CatalogDocument>, StoreError> {
        self.get_typed(KEY_CATALOG).await
    }

    pub async fn put_catalog(&self, document: &CatalogDocument) -> Result<(), StoreError> {
        self.set_typed(KEY_CATALOG, document).await
    }

    pub async fn exempt_domains(&self) -> Result<Option<Vec<String>>, StoreError> {
        self.get_typed(KEY_EXEMPT_DOMAINS).await
    }

    pub async fn put_exempt_domains(&self, domains: &[String]) -> Result<(), StoreError> {
        self.set_typed(KEY_EXEMPT_DOMAINS, &domains).await
    }

    /// Rebuild the whole process state.
    pub async fn load(&self) -> Result<CoordinatorProcessState, StoreError> {
        let mut tab_states = BTreeMap::new();
        for tab_id in self.tab_ids().await? {
            if let Some(state) = self.tab(tab_id).await? {
                tab_states.insert(tab_id, state);
            }
        }
        Ok(CoordinatorProcessState {
            active_tab_id: self.active_tab().await?,
            tab_states,
            catalog: self.catalog().await?,
            exempt_domains: self.exempt_domains().await?,
        })
    }
}
