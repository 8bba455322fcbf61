//! WebAssembly bindings for the PSP detector

use std::sync::{Arc, OnceLock};

use psp_core::{
    collect_corpus,
    scheduler::AddedNode,
    url::extract_host,
    CollectorConfig, DetectionResult, Engine, ExemptDomainList, ExemptMatcher, Mutation, PageSnapshot,
    ProviderCatalog, ReportGate, ScanScheduler,
};
use wasm_bindgen::prelude::*;

static ENGINE: OnceLock<Engine> = OnceLock::new();

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

fn load_engine(catalog_json: &str, exempt_json: &str) -> Result<Engine, String> {
    let catalog = ProviderCatalog::from_json(catalog_json).map_err(|e| format!("Failed to load catalog: {}", e))?;
    let exempt = match ExemptDomainList::from_json(exempt_json) {
        Ok(list) => list,
        Err(e) => {
            log::warn!("exempt list unreadable, treating as empty: {}", e);
            ExemptDomainList::default()
        }
    };
    Ok(Engine::new()
        .with_catalog(Arc::new(catalog))
        .with_exempt(ExemptMatcher::new(&exempt)))
}

fn detect_in_snapshot(engine: &Engine, snapshot_json: &str, config: &CollectorConfig) -> Result<DetectionResult, String> {
    let snapshot = PageSnapshot::from_json(snapshot_json).map_err(|e| format!("Invalid page snapshot: {}", e))?;
    let corpus = collect_corpus(&snapshot, config);
    Ok(engine.detect(corpus.url(), &corpus.text()))
}

fn not_initialized() -> DetectionResult {
    Engine::new().detect("", "")
}

fn set(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &key.into(), value);
}

fn result_to_js(result: &DetectionResult) -> js_sys::Object {
    let js_result = js_sys::Object::new();
    set(&js_result, "kind", &JsValue::from_str(result.kind()));
    match result {
        DetectionResult::Detected {
            provider,
            match_method,
            matched_value,
        } => {
            set(&js_result, "provider", &JsValue::from_str(provider));
            set(&js_result, "matchMethod", &JsValue::from_str(match_method.as_str()));
            set(&js_result, "matchedValue", &JsValue::from_str(matched_value));
        }
        DetectionResult::Exempt { reason, url } => {
            set(&js_result, "reason", &JsValue::from_str(reason));
            set(&js_result, "url", &JsValue::from_str(url));
        }
        DetectionResult::None { scanned_count } => {
            set(&js_result, "scannedCount", &JsValue::from(*scanned_count as u32));
        }
        DetectionResult::Error { cause, context } => {
            set(&js_result, "cause", &JsValue::from_str(cause));
            if let Some(context) = context {
                set(&js_result, "context", &JsValue::from_str(context));
            }
        }
    }
    js_result
}

#[wasm_bindgen]
pub fn init(catalog_json: &str, exempt_json: &str) -> Result<(), JsValue> {
    if ENGINE.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the page to reinitialize."));
    }
    let engine = load_engine(catalog_json, exempt_json).map_err(|e| JsValue::from_str(&e))?;
    ENGINE
        .set(engine)
        .map_err(|_| JsValue::from_str("Failed to set engine state"))?;
    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.get().is_some()
}

#[wasm_bindgen]
pub fn get_catalog_info() -> JsValue {
    let result = js_sys::Object::new();
    let Some(catalog) = ENGINE.get().and_then(Engine::catalog) else {
        set(&result, "initialized", &JsValue::from(false));
        return result.into();
    };

    set(&result, "initialized", &JsValue::from(true));
    set(&result, "providers", &JsValue::from(catalog.len() as u32));

    let groups = js_sys::Object::new();
    for group in catalog.groups() {
        set(&groups, group.kind.as_str(), &JsValue::from(group.members.len() as u32));
    }
    set(&result, "groups", &groups);

    let failures = js_sys::Array::new();
    for (name, _) in catalog.pattern_failures() {
        failures.push(&JsValue::from_str(name));
    }
    set(&result, "patternFailures", &failures);
    result.into()
}

/// Detect over a pre-built corpus string.
#[wasm_bindgen]
pub fn detect(url: &str, corpus: &str) -> JsValue {
    let result = match ENGINE.get() {
        Some(engine) => engine.detect(url, corpus),
        None => not_initialized(),
    };
    result_to_js(&result).into()
}

/// Collect the corpus from a serialized page snapshot and detect over it.
#[wasm_bindgen]
pub fn detect_snapshot(snapshot_json: &str) -> Result<JsValue, JsValue> {
    let Some(engine) = ENGINE.get() else {
        return Ok(result_to_js(&not_initialized()).into());
    };
    let result =
        detect_in_snapshot(engine, snapshot_json, &CollectorConfig::default()).map_err(|e| JsValue::from_str(&e))?;
    Ok(result_to_js(&result).into())
}

#[wasm_bindgen]
pub fn lookup_provider(name: &str) -> JsValue {
    let Some(descriptor) = ENGINE.get().and_then(Engine::catalog).and_then(|c| c.lookup(name)) else {
        return JsValue::NULL;
    };
    let result = js_sys::Object::new();
    set(&result, "name", &JsValue::from_str(&descriptor.name));
    set(&result, "url", &JsValue::from_str(&descriptor.url));
    set(&result, "image", &JsValue::from_str(&descriptor.image));
    set(&result, "summary", &JsValue::from_str(&descriptor.summary));
    result.into()
}

#[wasm_bindgen]
pub fn resolve_notice(name: &str) -> Option<String> {
    ENGINE
        .get()
        .and_then(Engine::catalog)
        .and_then(|c| c.resolve_notice(name))
        .map(str::to_string)
}

#[wasm_bindgen]
pub fn is_exempt(url: &str) -> bool {
    ENGINE
        .get()
        .and_then(Engine::exempt)
        .is_some_and(|exempt| exempt.is_exempt(url))
}

#[wasm_bindgen]
pub fn extract_host_js(url: &str) -> Option<String> {
    extract_host(url).map(|h| h.to_string())
}

// =============================================================================
// Page-side scheduling
// =============================================================================

/// Per-page scan scheduling and report deduplication.
#[wasm_bindgen]
pub struct PageScheduler {
    config: CollectorConfig,
    scheduler: ScanScheduler,
    gate: ReportGate,
}

#[wasm_bindgen]
impl PageScheduler {
    #[wasm_bindgen(constructor)]
    pub fn new(debounce_ms: u32, cooldown_ms: u32, max_nested_frames: u32) -> PageScheduler {
        let config = CollectorConfig {
            debounce_ms: debounce_ms as u64,
            cooldown_ms: cooldown_ms as u64,
            max_nested_frames: max_nested_frames as usize,
        };
        PageScheduler {
            config,
            scheduler: ScanScheduler::new(config),
            gate: ReportGate::new(),
        }
    }

    /// `added_tags` is the list of element names inserted by one mutation batch.
    pub fn on_mutation(&mut self, added_tags: JsValue, now_ms: f64) -> bool {
        let nodes = js_sys::Array::from(&added_tags)
            .iter()
            .filter_map(|v| v.as_string())
            .map(AddedNode::new)
            .collect();
        self.scheduler.on_mutation(&Mutation::new(nodes), now_ms as u64)
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.scheduler.next_deadline().map(|t| t as f64)
    }

    pub fn poll(&mut self, now_ms: f64) -> bool {
        self.scheduler.poll(now_ms as u64)
    }

    pub fn try_begin(&mut self, now_ms: f64) -> bool {
        self.scheduler.try_begin(now_ms as u64)
    }

    /// Detect over a snapshot, record the outcome and flag whether it should
    /// be reported (`shouldReport`).
    pub fn scan(&mut self, snapshot_json: &str) -> Result<JsValue, JsValue> {
        let result = match ENGINE.get() {
            Some(engine) => detect_in_snapshot(engine, snapshot_json, &self.config).map_err(|e| JsValue::from_str(&e))?,
            None => not_initialized(),
        };
        self.scheduler.record_result(&result);
        let should_report = self.gate.admit(&result);

        let js_result = result_to_js(&result);
        set(&js_result, "shouldReport", &JsValue::from(should_report));
        Ok(js_result.into())
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    /// New page load.
    pub fn reset(&mut self) {
        self.scheduler.reset();
        self.gate.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_core::MatchMethod;

    const CATALOG: &str = r#"{"psps": [
        { "name": "Adyen", "url": "https://adyen.com", "image": "adyen.png", "summary": "Adyen",
          "regex": "checkoutshopper-[a-z]+\\.adyen\\.com" }
    ]}"#;

    #[test]
    fn test_load_engine_and_detect_snapshot() {
        let engine = load_engine(CATALOG, r#"{"exemptDomains": ["example.org"]}"#).unwrap();
        let snapshot = r#"{"url": "https://shop.test",
            "scripts": ["https://checkoutshopper-live.adyen.com/sdk.js"]}"#;
        let result = detect_in_snapshot(&engine, snapshot, &CollectorConfig::default()).unwrap();
        assert_eq!(
            result,
            DetectionResult::detected("Adyen", MatchMethod::Pattern, "checkoutshopper-live.adyen.com")
        );

        let exempt = r#"{"url": "https://pay.example.org"}"#;
        let result = detect_in_snapshot(&engine, exempt, &CollectorConfig::default()).unwrap();
        assert_eq!(result.kind(), "exempt");
    }

    #[test]
    fn test_bad_inputs() {
        assert!(load_engine("{}", "{}").is_err());
        // An unreadable exempt list fails open
        assert!(load_engine(CATALOG, "nope").is_ok());

        let engine = load_engine(CATALOG, "{}").unwrap();
        assert!(detect_in_snapshot(&engine, "[", &CollectorConfig::default()).is_err());
        assert_eq!(not_initialized().kind(), "error");
    }
}
