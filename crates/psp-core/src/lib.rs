//! PSP Detector Core Library
//!
//! This crate provides the synchronous half of the PSP detector: the provider
//! catalog, the detection engine and the page-side corpus collector. Nothing
//! in here performs I/O; the async coordinator lives in `psp-runtime`.
//!
//! # Architecture
//!
//! A catalog document is validated and compiled once into a
//! [`ProviderCatalog`]. The [`Engine`] scans a corpus (page URL plus every
//! script, frame and form target reachable from the page) against the catalog
//! in catalog order and returns exactly one [`DetectionResult`].
//!
//! # Modules
//!
//! - `catalog`: Catalog document schema, validation, lookup and notices
//! - `matcher`: Per-provider compiled token/pattern matchers
//! - `exempt`: Exempt-domain list and host matcher
//! - `engine`: The `detect` entry point
//! - `collector`: Corpus collection from page documents
//! - `scheduler`: Mutation debounce, cooldown and report deduplication
//! - `protocol`: Request/response messages between page agents and the coordinator
//! - `url`: Fast URL parsing without allocations
//! - `types`: Shared type definitions

pub mod catalog;
pub mod collector;
pub mod config;
pub mod engine;
pub mod exempt;
pub mod matcher;
pub mod protocol;
pub mod scheduler;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use catalog::{CatalogDocument, CatalogError, ProviderCatalog, ProviderDescriptor};
pub use collector::{collect_corpus, Corpus, PageDocument, PageSnapshot};
pub use config::CollectorConfig;
pub use engine::{detect, Engine};
pub use exempt::{ExemptDomainList, ExemptMatcher};
pub use protocol::{DetectionReport, ErrorCode, Request, Response};
pub use scheduler::{Mutation, ReportGate, ScanScheduler};
pub use types::{DetectionResult, Generation, MatchMethod, TabId};
