//! PSP Detector Runtime
//!
//! The asynchronous half of the detector: a restart-tolerant tab lifecycle
//! coordinator, the durable state it is rebuilt from, the message transport
//! between coordinator and page agents, and the page agent itself.
//!
//! # Modules
//!
//! - `coordinator`: Tab state machine and protocol handlers
//! - `state`: Persisted tab state and typed store access
//! - `store`: Durable key/value stores (memory, JSON file)
//! - `locks`: Per-tab critical sections
//! - `loader`: Catalog and exempt-list loaders with deadlines
//! - `effects`: Presentation and scan-dispatch hooks
//! - `router`: Inbound message validation and dispatch
//! - `transport`: Channel transport and coordinator serving loop
//! - `retry`: Retrying transport decorator
//! - `client`: Typed protocol client
//! - `agent`: Page agent driving collection, detection and reporting
//! - `config`: Runtime configuration

pub mod agent;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod effects;
pub mod error;
pub mod loader;
pub mod locks;
pub mod retry;
pub mod router;
pub mod state;
pub mod store;
pub mod transport;

pub use agent::PageAgent;
pub use client::ProtocolClient;
pub use config::{CoordinatorConfig, RetryPolicy, RuntimeConfig};
pub use coordinator::Coordinator;
pub use effects::{LogEffects, Presenter, ScanDispatcher};
pub use error::{AgentError, ClientError, ConfigError, CoordinatorError, LoadError, StoreError, TransportError};
pub use loader::{LocationLoader, Resource, ResourceLoader, StaticLoader};
pub use retry::RetryingTransport;
pub use router::route;
pub use state::{CoordinatorProcessState, TabPhase, TabState};
pub use store::{JsonFileStore, MemoryStore, StateStore};
pub use transport::{ChannelTransport, Envelope, Transport};
