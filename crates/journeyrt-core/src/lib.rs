//! # journeyrt-core
//!
//! Core library for the journey runtime - a manifest-driven interpreter
//! that executes multi-step user journeys hosted partly in an embedded
//! web view and partly in native code.
//!
//! A journey is described by a signed manifest plus an OpenAPI bundle.
//! The runtime fetches and signature-verifies the manifest, resolves
//! manifest-referenced operation identifiers against the bundle, and
//! interprets the declared steps, transitions, guards, timeouts, and API
//! bindings. A signed, origin-gated message bridge connects the hosted
//! web surface to native code.
//!
//! ## Subsystems
//!
//! - **Manifest loading**: fetch, detached-JWS verification, schema
//!   validation ([`manifest`])
//! - **OpenAPI resolution**: operation lookup and request building
//!   ([`openapi`])
//! - **API client**: retry/backoff, idempotency, fixed error-code mapping
//!   ([`api`])
//! - **State machine**: step interpretation on a serialized event queue
//!   ([`machine`])
//! - **Web bridge**: two-party handshake, per-step method allow-lists,
//!   envelope signing ([`bridge`])
//! - **Session**: correlation identifiers and PII-free resume snapshots
//!   ([`session`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use journeyrt_core::config::{Environment, RuntimeConfig};
//! use journeyrt_core::crypto::TrustStore;
//! use journeyrt_core::runtime::JourneyRuntime;
//! use journeyrt_core::session::InMemoryStore;
//!
//! # async fn example(host: Arc<dyn journeyrt_core::webview::WebViewHost>) {
//! let config = RuntimeConfig::new(Environment::Sandbox, "partner-1", "client-1");
//! let runtime = JourneyRuntime::builder(config)
//!     .trust_store(Arc::new(TrustStore::new()))
//!     .snapshot_store(Arc::new(InMemoryStore::new()))
//!     .web_view_host(host)
//!     .build();
//!
//! let handle = runtime.start_journey("account-opening", "bearer-token", None);
//! let outcome = handle.outcome().await;
//! # let _ = outcome;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod bridge;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod expr;
pub mod machine;
pub mod manifest;
pub mod openapi;
pub mod runtime;
pub mod session;
pub mod webview;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Environment, FeatureFlags, RuntimeConfig};
    pub use crate::error::ErrorCode;
    pub use crate::manifest::{Manifest, Step, StepKind};
    pub use crate::runtime::{JourneyOutcome, JourneyRuntime};
    pub use crate::session::{InMemoryStore, SessionManager};
}

/// Re-export commonly used types at the crate root.
pub use config::RuntimeConfig;
pub use error::ErrorCode;
pub use manifest::Manifest;
pub use runtime::{JourneyOutcome, JourneyRuntime};
