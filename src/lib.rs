//! # Streamgate
//!
//! **Subscription entitlement resolution and TTL caching for streaming
//! catalog clients.**
//!
//! Streamgate keeps a single access decision current for the signed-in
//! user of a streaming catalog. It asks the backend for the four facts that
//! can grant access and reduces them to one boolean:
//!
//! ```text
//! has_access = is_admin || is_subscribed || has_trial_access || has_temp_access
//! ```
//!
//! ## Features
//!
//! - **Periodic re-check**: every 5 minutes by default, with a minimum
//!   spacing so repeated triggers cost one backend call
//! - **Bounded retry**: 3 attempts, 5 seconds apart, then the last known
//!   snapshot stays in effect and the user gets one notice
//! - **Shared TTL cache**: FIFO capacity eviction, lazy expiry on read,
//!   and a background sweep
//! - **Structured cancellation**: shutdown aborts timers and in-flight
//!   calls, so no update lands after teardown
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamgate::{EntitlementResolver, Session, StreamgateConfig};
//!
//! # async fn run() -> Result<(), streamgate::StreamgateError> {
//! let config = StreamgateConfig::from_env()?;
//! let resolver = Arc::new(EntitlementResolver::connect(config)?);
//! let tasks = resolver.start();
//!
//! resolver.sign_in(Session::new("user-id", "access-token")).await;
//! if resolver.has_access() {
//!     println!("Playback unlocked");
//! }
//!
//! resolver.shutdown();
//! tasks.join().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure policy
//!
//! A backend outage never revokes access that was already confirmed: after
//! the last retry the previous snapshot is kept. A fresh session with no
//! confirmed snapshot stays at "no access".

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;
pub mod session;

// Protocol layer
pub mod protocol;

// Client layer
pub mod client;

// Cache layer
pub mod cache;

// Policy layer
pub mod policy;

// Presentation boundary
pub mod notify;
pub mod state;

// Resolver (main public API)
pub mod resolver;

// Re-exports for public API
pub use cache::TtlCache;
pub use client::http::RestBackend;
pub use client::EntitlementBackend;
pub use clock::{Clock, SystemClock};
pub use config::StreamgateConfig;
pub use errors::StreamgateError;
pub use notify::{Notice, NoticeLevel, Notifier, TracingNotifier};
pub use protocol::models::{EntitlementSnapshot, SubscriptionStatusRecord};
pub use resolver::{BackgroundTasks, EntitlementResolver, ResolveOutcome};
pub use session::Session;
pub use state::{EntitlementState, ResolverPhase};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
