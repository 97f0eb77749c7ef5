//! Watch a user's access decision as it is re-checked.
//!
//! # Running
//!
//! ```bash
//! export STREAMGATE_BACKEND_URL="https://your-project.example.co"
//! export STREAMGATE_ANON_KEY="public-anon-key"
//! export STREAMGATE_USER_ID="user-uuid"
//! export STREAMGATE_ACCESS_TOKEN="session-jwt"
//! cargo run --example watch_access
//! ```

use std::sync::Arc;
use std::time::Duration;
use streamgate::{EntitlementResolver, Session, StreamgateConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "streamgate=debug,watch_access=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match StreamgateConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };

    let resolver = match EntitlementResolver::connect(config) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(error = %e, "Failed to build resolver");
            std::process::exit(1);
        }
    };

    let tasks = resolver.start();
    let mut rx = resolver.subscribe();

    // Session values come from the auth provider; empty ones are a no-op
    let session = Session::new(
        std::env::var("STREAMGATE_USER_ID").unwrap_or_default(),
        std::env::var("STREAMGATE_ACCESS_TOKEN").unwrap_or_default(),
    );
    let outcome = resolver.sign_in(session).await;
    info!(?outcome, "Initial check");

    let watch_for = Duration::from_secs(15 * 60);
    let _ = tokio::time::timeout(watch_for, async {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            info!(
                has_access = state.has_access(),
                loading = state.is_loading(),
                tier = state.subscription_tier().unwrap_or("-"),
                phase = ?state.phase,
                "Entitlement state"
            );
        }
    })
    .await;

    resolver.shutdown();
    tasks.join().await;
}
