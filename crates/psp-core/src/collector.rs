//! Corpus Collector
//!
//! Builds the scan corpus for one page: the page URL, every script, frame
//! and form-target reference, inline script text, and one extra level of the
//! same for same-origin nested frames. Cross-origin frames contribute their
//! `src` only; failing to read them is expected and not reported.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::CollectorConfig;
use crate::url::{is_same_origin, is_valid_url};

// =============================================================================
// Document Abstraction
// =============================================================================

/// Kind of scannable reference found in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Script,
    InlineScript,
    Frame,
    FormTarget,
}

/// One scannable reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub value: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Result of trying to read a nested frame's document.
pub enum FrameAccess<'a> {
    /// The frame's document is readable
    Readable(&'a dyn PageDocument),
    /// Access was refused (cross-origin or detached)
    Denied,
}

/// A nested frame as seen from its parent document.
pub struct FrameRef<'a> {
    pub src: &'a str,
    pub access: FrameAccess<'a>,
}

/// Read-only view of a page document.
pub trait PageDocument {
    fn url(&self) -> &str;

    /// Script, inline-script and form-target references (frames excluded).
    fn resources(&self) -> Vec<ResourceRef>;

    fn frames(&self) -> Vec<FrameRef<'_>>;
}

// =============================================================================
// Corpus
// =============================================================================

/// Scan corpus for one page: deduplicated entries in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    url: String,
    entries: Vec<String>,
    frames_visited: usize,
}

impl Corpus {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            entries: Vec::new(),
            frames_visited: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nested frame documents that were read.
    pub fn frames_visited(&self) -> usize {
        self.frames_visited
    }

    /// Newline-joined text the engine scans.
    pub fn text(&self) -> String {
        self.entries.join("\n")
    }
}

struct CorpusBuilder {
    corpus: Corpus,
    seen: HashSet<String>,
}

impl CorpusBuilder {
    fn push(&mut self, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        if self.seen.insert(value.to_string()) {
            self.corpus.entries.push(value.to_string());
        }
    }

    fn push_document(&mut self, doc: &dyn PageDocument) {
        self.push(doc.url());
        for resource in doc.resources() {
            self.push(&resource.value);
        }
    }
}

/// Collect the corpus for a document.
pub fn collect_corpus(doc: &dyn PageDocument, config: &CollectorConfig) -> Corpus {
    let mut builder = CorpusBuilder {
        corpus: Corpus::new(doc.url()),
        seen: HashSet::new(),
    };

    builder.push_document(doc);

    for frame in doc.frames() {
        builder.push(frame.src);

        let FrameAccess::Readable(inner) = frame.access else {
            continue;
        };
        if builder.corpus.frames_visited >= config.max_nested_frames {
            continue;
        }
        // about:blank and srcdoc frames inherit the parent origin
        if is_valid_url(inner.url()) && !is_same_origin(doc.url(), inner.url()) {
            continue;
        }

        builder.corpus.frames_visited += 1;
        builder.push_document(inner);
        for nested in inner.frames() {
            builder.push(nested.src);
        }
    }

    builder.corpus
}

// =============================================================================
// Page Snapshot
// =============================================================================

/// Serialized page document, as captured by a page agent or fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    pub scripts: Vec<String>,
    pub inline_scripts: Vec<String>,
    pub forms: Vec<String>,
    pub frames: Vec<FrameSnapshot>,
}

/// A nested frame. `document` is `None` when the frame could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSnapshot {
    pub src: String,
    pub document: Option<PageSnapshot>,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl PageDocument for PageSnapshot {
    fn url(&self) -> &str {
        &self.url
    }

    fn resources(&self) -> Vec<ResourceRef> {
        let scripts = self.scripts.iter().map(|s| ResourceRef::new(ResourceKind::Script, s.as_str()));
        let inline = self
            .inline_scripts
            .iter()
            .map(|s| ResourceRef::new(ResourceKind::InlineScript, s.as_str()));
        let forms = self.forms.iter().map(|s| ResourceRef::new(ResourceKind::FormTarget, s.as_str()));
        scripts.chain(inline).chain(forms).collect()
    }

    fn frames(&self) -> Vec<FrameRef<'_>> {
        self.frames
            .iter()
            .map(|f| FrameRef {
                src: &f.src,
                access: match &f.document {
                    Some(doc) => FrameAccess::Readable(doc),
                    None => FrameAccess::Denied,
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(src: &str, document: Option<PageSnapshot>) -> FrameSnapshot {
        FrameSnapshot {
            src: src.to_string(),
            document,
        }
    }

    #[test]
    fn test_collects_page_references() {
        let mut page = PageSnapshot::new("https://shop.example/checkout");
        page.scripts = vec!["https://js.stripe.com/v3".into(), "https://js.stripe.com/v3".into()];
        page.inline_scripts = vec!["Stripe('pk_live')".into()];
        page.forms = vec!["https://shop.example/pay".into()];
        page.frames = vec![frame("https://checkout.stripe.com/frame", None)];

        let corpus = collect_corpus(&page, &CollectorConfig::default());
        assert_eq!(
            corpus.entries(),
            &[
                "https://shop.example/checkout".to_string(),
                "https://js.stripe.com/v3".to_string(),
                "Stripe('pk_live')".to_string(),
                "https://shop.example/pay".to_string(),
                "https://checkout.stripe.com/frame".to_string(),
            ]
        );
        assert_eq!(corpus.frames_visited(), 0);
    }

    #[test]
    fn test_same_origin_frame_adds_one_level() {
        let mut deep = PageSnapshot::new("https://shop.example/deep");
        deep.scripts = vec!["https://too-deep.example/sdk.js".into()];

        let mut inner = PageSnapshot::new("https://shop.example/payment-frame");
        inner.scripts = vec!["https://www.paypal.com/sdk/js".into()];
        inner.frames = vec![frame("https://shop.example/deep", Some(deep))];

        let mut page = PageSnapshot::new("https://shop.example/");
        page.frames = vec![frame("https://shop.example/payment-frame", Some(inner))];

        let corpus = collect_corpus(&page, &CollectorConfig::default());
        let text = corpus.text();
        assert!(text.contains("https://www.paypal.com/sdk/js"));
        assert!(text.contains("https://shop.example/deep"));
        assert!(!text.contains("too-deep.example"));
        assert_eq!(corpus.frames_visited(), 1);
    }

    #[test]
    fn test_cross_origin_content_is_skipped() {
        let mut foreign = PageSnapshot::new("https://other.example/widget");
        foreign.scripts = vec!["https://secret.example/sdk.js".into()];

        let mut page = PageSnapshot::new("https://shop.example/");
        page.frames = vec![frame("https://other.example/widget", Some(foreign))];

        let corpus = collect_corpus(&page, &CollectorConfig::default());
        assert!(corpus.text().contains("https://other.example/widget"));
        assert!(!corpus.text().contains("secret.example"));
    }

    #[test]
    fn test_nested_frame_cap() {
        let mut page = PageSnapshot::new("https://shop.example/");
        for i in 0..15 {
            let mut inner = PageSnapshot::new("about:blank");
            inner.scripts = vec![format!("https://cdn{}.example/a.js", i)];
            page.frames.push(frame("about:blank", Some(inner)));
        }

        let config = CollectorConfig {
            max_nested_frames: 10,
            ..Default::default()
        };
        let corpus = collect_corpus(&page, &config);
        assert_eq!(corpus.frames_visited(), 10);
        assert!(corpus.text().contains("cdn9.example"));
        assert!(!corpus.text().contains("cdn10.example"));
    }

    #[test]
    fn test_snapshot_json() {
        let page = PageSnapshot::from_json(
            r#"{"url": "https://shop.example", "scripts": ["https://js.stripe.com/v3"],
                "frames": [{"src": "https://x.example"}]}"#,
        )
        .unwrap();
        assert_eq!(page.scripts.len(), 1);
        assert!(page.frames[0].document.is_none());
    }
}
