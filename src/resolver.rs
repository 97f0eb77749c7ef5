//! Entitlement Resolver - the main public API for Streamgate.
//!
//! The `EntitlementResolver` keeps one access decision current for the
//! signed-in user:
//! - periodic re-checks against the backend, spaced by `recheck_interval`
//! - shared TTL cache in front of the backend
//! - bounded retry, then fail-open to the last-known snapshot
//! - cancellation of timers and in-flight calls on shutdown

use crate::cache::{spawn_sweeper, status_key, TtlCache};
use crate::client::http::RestBackend;
use crate::client::EntitlementBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::StreamgateConfig;
use crate::notify::{Notice, Notifier, TracingNotifier};
use crate::protocol::models::{EntitlementSnapshot, SubscriptionStatusRecord};
use crate::session::Session;
use crate::state::{EntitlementState, ResolverPhase};
use crate::StreamgateError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a call to [`EntitlementResolver::resolve`] or
/// [`EntitlementResolver::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// User id or token absent; nothing happened.
    Unauthenticated,
    /// Another resolution was already running; nothing happened.
    AlreadyInFlight,
    /// The last completed check for this user started less than the recheck interval ago.
    Fresh,
    /// A new snapshot is in effect.
    Resolved {
        /// The status record came from the cache rather than the backend.
        from_cache: bool,
    },
    /// Every attempt failed; the previous snapshot stays in effect.
    KeptStale,
    /// The session changed while the check was running; its result was dropped.
    Superseded,
    /// The resolver shut down during the check; no state was touched.
    Cancelled,
}

/// Handles of the resolver's background tasks.
pub struct BackgroundTasks {
    /// Periodic entitlement re-check.
    pub recheck: JoinHandle<()>,
    /// Cache sweep.
    pub sweeper: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Wait for both tasks to finish (after [`EntitlementResolver::shutdown`]).
    pub async fn join(self) {
        if let Err(e) = self.recheck.await {
            warn!(error = %e, "Entitlement re-check task failed");
        }
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "Cache sweeper task failed");
        }
    }
}

/// Resets the in-flight flag when a resolution ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the current user's entitlement snapshot up to date.
///
/// Create one per signed-in UI context, wrap it in an `Arc`, call
/// [`start`](Self::start), and [`shutdown`](Self::shutdown) on teardown.
pub struct EntitlementResolver {
    config: StreamgateConfig,
    clock: Arc<dyn Clock>,
    backend: Arc<dyn EntitlementBackend>,
    cache: Arc<TtlCache>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<EntitlementState>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    in_flight: AtomicBool,
    last_resolved: Mutex<Option<(String, Instant)>>,
    cancel: CancellationToken,
}

impl EntitlementResolver {
    /// Create a resolver over an existing backend and cache.
    ///
    /// Uses the system clock and logs notices through `tracing`.
    ///
    /// # Errors
    /// Returns an error if configuration validation fails.
    pub fn new(
        config: StreamgateConfig,
        backend: Arc<dyn EntitlementBackend>,
        cache: Arc<TtlCache>,
    ) -> Result<Self, StreamgateError> {
        config.validate()?;
        Ok(Self::with_parts(config, backend, cache, Arc::new(SystemClock)))
    }

    /// Create a resolver talking to the configured backend over HTTP,
    /// with a fresh cache sized from `config`.
    pub fn connect(config: StreamgateConfig) -> Result<Self, StreamgateError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend = Arc::new(RestBackend::new(&config)?);
        let cache = Arc::new(TtlCache::from_config(&config, clock.clone()));
        Ok(Self::with_parts(config, backend, cache, clock))
    }

    /// Create a resolver with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        config: StreamgateConfig,
        backend: Arc<dyn EntitlementBackend>,
        cache: Arc<TtlCache>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StreamgateError> {
        config.validate()?;
        Ok(Self::with_parts(config, backend, cache, clock))
    }

    fn with_parts(
        config: StreamgateConfig,
        backend: Arc<dyn EntitlementBackend>,
        cache: Arc<TtlCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(EntitlementState::default());
        Self {
            config,
            clock,
            backend,
            cache,
            notifier: Arc::new(TracingNotifier),
            state,
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            last_resolved: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Route user-visible notices to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Spawn the periodic re-check and the cache sweeper.
    ///
    /// The first check runs immediately. Both tasks stop on
    /// [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) -> BackgroundTasks {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.config.recheck_interval;

        let recheck = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = this.recheck().await;
                        debug!(?outcome, "Periodic entitlement check");
                    }
                }
            }

            info!("Entitlement re-check stopped");
        });

        let sweeper = spawn_sweeper(
            self.cache.clone(),
            self.config.sweep_interval,
            self.cancel.child_token(),
        );

        BackgroundTasks { recheck, sweeper }
    }

    /// Cancel background tasks and any in-flight backend call.
    ///
    /// No state update is published after this returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Install `session` and resolve entitlements for it.
    ///
    /// Switching to a different user drops the previous user's snapshot
    /// before anything else runs. If a check for the previous user is still
    /// in flight, that check re-runs for the new session when it returns.
    pub async fn sign_in(&self, session: Session) -> ResolveOutcome {
        info!(user_id = %session.user_id, token = %session.token_fingerprint(), "Session installed");
        let previous = self.session.lock().replace(session.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);

        if previous.map_or(true, |p| p.user_id != session.user_id) {
            *self.last_resolved.lock() = None;
            self.state.send_replace(EntitlementState::default());
        }

        self.resolve(&session.user_id, &session.access_token).await
    }

    /// Drop the session, reset state to "no access" and clear the cache.
    pub fn sign_out(&self) {
        let previous = self.session.lock().take();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.last_resolved.lock() = None;
        self.cache.clear();
        self.state.send_replace(EntitlementState::default());

        if let Some(previous) = previous {
            info!(user_id = %previous.user_id, "Session cleared");
        }
    }

    /// Current session, if signed in.
    pub fn current_session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<EntitlementState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> EntitlementState {
        self.state.borrow().clone()
    }

    /// Current derived access decision.
    pub fn has_access(&self) -> bool {
        self.state.borrow().has_access()
    }

    /// Shared cache this resolver reads through.
    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    /// Get the current configuration.
    pub fn config(&self) -> &StreamgateConfig {
        &self.config
    }

    /// Resolve entitlements for `user_id`.
    ///
    /// No-op when either argument is empty, when another resolution is in
    /// flight, or when the last check for this user started less than
    /// `recheck_interval` ago. Never returns an error: failures end in
    /// [`ResolveOutcome::KeptStale`] and a single notice.
    pub async fn resolve(&self, user_id: &str, access_token: &str) -> ResolveOutcome {
        if user_id.is_empty() || access_token.is_empty() {
            debug!("No session, skipping entitlement check");
            return ResolveOutcome::Unauthenticated;
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!(%user_id, "Entitlement check already in flight");
            return ResolveOutcome::AlreadyInFlight;
        };

        if self.is_fresh(user_id, self.config.recheck_interval) {
            return ResolveOutcome::Fresh;
        }

        self.run_for_current_session(user_id, access_token, true).await
    }

    /// Re-resolve the signed-in session now, bypassing the interval and the cache.
    pub async fn refresh(&self) -> ResolveOutcome {
        let Some(session) = self.current_session().filter(Session::is_complete) else {
            return ResolveOutcome::Unauthenticated;
        };

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!(user_id = %session.user_id, "Entitlement check already in flight");
            return ResolveOutcome::AlreadyInFlight;
        };

        self.cache.delete(&status_key(&session.user_id));
        self.run_for_current_session(&session.user_id, &session.access_token, false)
            .await
    }

    /// One tick of the periodic re-check.
    ///
    /// Goes to the backend even when the shared cache still holds a record.
    /// A check that started within the last half interval (the mount-time
    /// check racing the first tick) counts as fresh.
    async fn recheck(&self) -> ResolveOutcome {
        let Some(session) = self.current_session().filter(Session::is_complete) else {
            return ResolveOutcome::Unauthenticated;
        };

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return ResolveOutcome::AlreadyInFlight;
        };

        if self.is_fresh(&session.user_id, self.config.recheck_interval / 2) {
            return ResolveOutcome::Fresh;
        }

        self.run_for_current_session(&session.user_id, &session.access_token, false)
            .await
    }

    /// Grant `target_user_id` temporary access for `days` days.
    ///
    /// Invalidates the target's cached status; when the target is the
    /// signed-in user, also refreshes this resolver.
    ///
    /// # Errors
    /// - `MissingSession` - Not signed in
    /// - `InvalidInput` - Empty target or zero days
    /// - `Forbidden` - Caller is not an admin
    /// - `Cancelled` - Resolver shut down during the call
    pub async fn grant_temp_access(
        &self,
        target_user_id: &str,
        days: u32,
    ) -> Result<DateTime<Utc>, StreamgateError> {
        let session = self
            .current_session()
            .filter(Session::is_complete)
            .ok_or(StreamgateError::MissingSession)?;

        if target_user_id.is_empty() {
            return Err(StreamgateError::InvalidInput(
                "target user id cannot be empty".to_string(),
            ));
        }
        if days == 0 {
            return Err(StreamgateError::InvalidInput(
                "days must be at least 1".to_string(),
            ));
        }

        let expires_at = self
            .cancellable(
                self.backend
                    .grant_temp_access(target_user_id, days, &session.access_token),
            )
            .await
            .ok_or(StreamgateError::Cancelled)??;

        info!(
            target = %target_user_id,
            days,
            %expires_at,
            granted_by = %session.user_id,
            "Temporary access granted"
        );
        self.notifier.notify(Notice::info(
            "Temporary access granted",
            format!(
                "Access for {} is active until {}.",
                target_user_id,
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
        ));

        self.cache.delete(&status_key(target_user_id));
        if target_user_id == session.user_id {
            let outcome = self.refresh().await;
            debug!(?outcome, "Refreshed after self-grant");
        }

        Ok(expires_at)
    }

    fn is_fresh(&self, user_id: &str, within: Duration) -> bool {
        match self.last_resolved.lock().as_ref() {
            Some((user, started)) => user == user_id && started.elapsed() < within,
            None => false,
        }
    }

    /// Await `fut` unless the resolver shuts down first.
    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Publish a state change unless the session changed since `generation`.
    ///
    /// The check runs under the watch channel's write lock, so a concurrent
    /// `sign_in`/`sign_out` reset is never overwritten.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut EntitlementState)) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|s| {
            if self.generation.load(Ordering::Acquire) != generation {
                return false;
            }
            update(s);
            applied = true;
            true
        });
        applied
    }

    /// Run a check while holding the in-flight guard.
    ///
    /// When the session changes mid-check, the triggers for the new session
    /// were turned away by the guard, so the check is repeated for whoever is
    /// signed in now. Returns the outcome of the first check.
    async fn run_for_current_session(
        &self,
        user_id: &str,
        access_token: &str,
        use_cache: bool,
    ) -> ResolveOutcome {
        let first = self.run_check(user_id, access_token, use_cache).await;

        let mut outcome = first;
        while outcome == ResolveOutcome::Superseded {
            let Some(session) = self.current_session().filter(Session::is_complete) else {
                break;
            };
            debug!(user_id = %session.user_id, "Re-running entitlement check for new session");
            outcome = self
                .run_check(&session.user_id, &session.access_token, true)
                .await;
        }

        first
    }

    async fn run_check(
        &self,
        user_id: &str,
        access_token: &str,
        use_cache: bool,
    ) -> ResolveOutcome {
        if self.cancel.is_cancelled() {
            return ResolveOutcome::Cancelled;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let started = Instant::now();
        let key = status_key(user_id);

        if use_cache {
            match self.cache.get_json::<SubscriptionStatusRecord>(&key) {
                Ok(Some(record)) => {
                    debug!(%user_id, "Subscription status served from cache");
                    return if self.apply(generation, started, user_id, &record) {
                        ResolveOutcome::Resolved { from_cache: true }
                    } else {
                        ResolveOutcome::Superseded
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%user_id, error = %e, "Dropping unreadable cached status");
                    self.cache.delete(&key);
                }
            }
        }

        if !self.publish(generation, |s| s.phase = ResolverPhase::Checking) {
            return ResolveOutcome::Superseded;
        }

        let max_attempts = self.config.max_attempts;
        let mut attempt = 0;
        let last_error = loop {
            attempt += 1;

            let Some(result) = self
                .cancellable(self.backend.fetch_status(user_id, access_token))
                .await
            else {
                debug!(%user_id, "Entitlement check cancelled");
                return ResolveOutcome::Cancelled;
            };

            if self.generation.load(Ordering::Acquire) != generation {
                debug!(%user_id, "Session changed during entitlement check");
                return ResolveOutcome::Superseded;
            }

            match result {
                Ok(record) => {
                    if let Err(e) =
                        self.cache
                            .set_json(key.as_str(), &record, Some(self.config.status_ttl))
                    {
                        warn!(%user_id, error = %e, "Failed to cache subscription status");
                    }
                    return if self.apply(generation, started, user_id, &record) {
                        ResolveOutcome::Resolved { from_cache: false }
                    } else {
                        ResolveOutcome::Superseded
                    };
                }
                Err(e) => {
                    warn!(%user_id, attempt, max_attempts, error = %e, "Entitlement check failed");

                    if attempt >= max_attempts || !e.is_transient() {
                        break e;
                    }

                    if !self.publish(generation, |s| s.phase = ResolverPhase::Failed { attempt }) {
                        return ResolveOutcome::Superseded;
                    }
                    if self
                        .cancellable(tokio::time::sleep(self.config.retry_delay))
                        .await
                        .is_none()
                    {
                        return ResolveOutcome::Cancelled;
                    }
                    // Signed out or switched users during the delay: the old token is done
                    if !self.publish(generation, |s| s.phase = ResolverPhase::Checking) {
                        debug!(%user_id, "Session changed during retry delay");
                        return ResolveOutcome::Superseded;
                    }
                }
            }
        };

        if !self.publish(generation, |s| s.phase = ResolverPhase::Resolved { stale: true }) {
            return ResolveOutcome::Superseded;
        }

        warn!(
            %user_id,
            attempts = attempt,
            error = %last_error,
            "Giving up on entitlement check, keeping last known snapshot"
        );
        self.notifier.notify(Notice::error(
            "Subscription check failed",
            "We couldn't verify your subscription right now. Please try again later.",
        ));

        ResolveOutcome::KeptStale
    }

    /// Publish the snapshot for `record`. Returns false if the session changed.
    fn apply(
        &self,
        generation: u64,
        started: Instant,
        user_id: &str,
        record: &SubscriptionStatusRecord,
    ) -> bool {
        let now = self.clock.now_utc();
        let snapshot = EntitlementSnapshot::from_status_record(record, now);
        let has_access = snapshot.has_access();
        let (is_admin, is_subscribed) = (snapshot.is_admin, snapshot.is_subscribed);
        let (has_trial_access, has_temp_access) =
            (snapshot.has_trial_access, snapshot.has_temp_access);

        let applied = self.publish(generation, |s| {
            *s = EntitlementState {
                snapshot,
                phase: ResolverPhase::Resolved { stale: false },
                resolved_at: Some(now),
            };
        });
        if !applied {
            return false;
        }

        // Measured from the start of the check so backend latency does not
        // push the next periodic check back a whole interval
        *self.last_resolved.lock() = Some((user_id.to_string(), started));

        info!(
            %user_id,
            has_access,
            is_admin,
            is_subscribed,
            has_trial_access,
            has_temp_access,
            "Entitlements resolved"
        );
        true
    }
}
