//! End-to-end resolver behavior against an in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamgate::protocol::models::{TempAccessRecord, TrialWindow};
use streamgate::{
    Clock, EntitlementBackend, EntitlementResolver, EntitlementState, MockClock, Notice,
    NoticeLevel, Notifier, ResolveOutcome, ResolverPhase, Session, StreamgateConfig,
    StreamgateError, SubscriptionStatusRecord, TtlCache,
};
use tokio::sync::Notify;

struct FakeBackend {
    clock: Arc<MockClock>,
    record: Mutex<SubscriptionStatusRecord>,
    per_user: Mutex<HashMap<String, SubscriptionStatusRecord>>,
    failures: Mutex<VecDeque<StreamgateError>>,
    gate: Option<Arc<Notify>>,
    latency: Duration,
    calls: AtomicUsize,
}

impl FakeBackend {
    fn new(clock: Arc<MockClock>, record: SubscriptionStatusRecord) -> Self {
        Self {
            clock,
            record: Mutex::new(record),
            per_user: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            gate: None,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn with_user(self, user_id: &str, record: SubscriptionStatusRecord) -> Self {
        self.per_user.lock().insert(user_id.to_string(), record);
        self
    }

    fn fail_next(&self, error: StreamgateError) {
        self.failures.lock().push_back(error);
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementBackend for FakeBackend {
    async fn fetch_status(
        &self,
        user_id: &str,
        _access_token: &str,
    ) -> Result<SubscriptionStatusRecord, StreamgateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        if let Some(record) = self.per_user.lock().get(user_id) {
            return Ok(record.clone());
        }
        Ok(self.record.lock().clone())
    }

    async fn grant_temp_access(
        &self,
        _target_user_id: &str,
        days: u32,
        _access_token: &str,
    ) -> Result<DateTime<Utc>, StreamgateError> {
        let expires_at = self.clock.now_utc() + chrono::Duration::days(i64::from(days));
        self.record.lock().temp_access = Some(TempAccessRecord {
            expires_at,
            granted_by: Some("admin-1".to_string()),
        });
        Ok(expires_at)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

fn config() -> StreamgateConfig {
    StreamgateConfig {
        backend_url: "https://project.example.co".to_string(),
        anon_key: "anon".to_string(),
        ..StreamgateConfig::default()
    }
}

fn start_clock() -> Arc<MockClock> {
    Arc::new(MockClock::new(
        Utc.with_ymd_and_hms(2023, 12, 31, 12, 0, 0).unwrap(),
    ))
}

fn resolver_over(
    backend: Arc<FakeBackend>,
    cache: Arc<TtlCache>,
    clock: Arc<MockClock>,
) -> Arc<EntitlementResolver> {
    Arc::new(
        EntitlementResolver::new_with_clock(config(), backend, cache, clock).unwrap(),
    )
}

fn shared_cache(clock: &Arc<MockClock>) -> Arc<TtlCache> {
    let clock: Arc<dyn Clock> = clock.clone();
    Arc::new(TtlCache::new(100, Duration::from_secs(300), clock))
}

fn subscribed() -> SubscriptionStatusRecord {
    serde_json::from_value(serde_json::json!({
        "subscription": {
            "status": "active",
            "tier": "premium",
            "current_period_end": "2024-06-01T00:00:00Z"
        }
    }))
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn periodic_recheck_hits_backend_each_interval() {
    let clock = start_clock();
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()));
    let resolver = resolver_over(backend.clone(), shared_cache(&clock), clock.clone());
    let tasks = resolver.start();

    resolver.sign_in(Session::new("user-1", "token")).await;
    assert_eq!(backend.calls(), 1);
    assert_eq!(resolver.state().subscription_tier(), Some("premium"));

    // Immediate first tick sees a fresh snapshot
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.calls(), 1);

    clock.advance(chrono::Duration::seconds(301));
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(backend.calls(), 2);

    resolver.shutdown();
    tasks.join().await;
}

#[tokio::test(start_paused = true)]
async fn slow_backend_does_not_skip_periodic_checks() {
    let clock = start_clock();
    let backend = Arc::new(
        FakeBackend::new(clock.clone(), subscribed()).with_latency(Duration::from_millis(200)),
    );
    let resolver = resolver_over(backend.clone(), shared_cache(&clock), clock.clone());
    let tasks = resolver.start();

    resolver.sign_in(Session::new("user-1", "token")).await;
    assert_eq!(backend.calls(), 1);

    // Ticks at 300, 600, 900 and 1200 seconds each reach the backend
    tokio::time::sleep(Duration::from_secs(1210)).await;
    assert_eq!(backend.calls(), 5);
    assert!(resolver.state().is_subscribed());

    resolver.shutdown();
    tasks.join().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_periodic_checks() {
    let clock = start_clock();
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()));
    let resolver = resolver_over(backend.clone(), shared_cache(&clock), clock.clone());
    let tasks = resolver.start();

    resolver.sign_in(Session::new("user-1", "token")).await;
    resolver.shutdown();
    tasks.join().await;

    clock.advance(chrono::Duration::hours(1));
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(backend.calls(), 1);
    assert!(resolver.is_shut_down());
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_in_flight_response() {
    let clock = start_clock();
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()).gated(gate.clone()));
    let resolver = resolver_over(backend.clone(), shared_cache(&clock), clock.clone());

    let pending = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve("user-1", "token").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.calls(), 1);

    resolver.shutdown();
    gate.notify_one();

    assert_eq!(pending.await.unwrap(), ResolveOutcome::Cancelled);
    assert!(!resolver.has_access());
    assert!(resolver.state().resolved_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn concurrent_trigger_is_a_noop() {
    let clock = start_clock();
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()).gated(gate.clone()));
    let resolver = resolver_over(backend.clone(), shared_cache(&clock), clock.clone());

    let first = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve("user-1", "token").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(resolver.state().is_loading());

    assert_eq!(
        resolver.resolve("user-1", "token").await,
        ResolveOutcome::AlreadyInFlight
    );

    gate.notify_one();
    assert_eq!(
        first.await.unwrap(),
        ResolveOutcome::Resolved { from_cache: false }
    );
    assert_eq!(backend.calls(), 1);
    assert!(resolver.has_access());
}

#[tokio::test(start_paused = true)]
async fn sign_out_during_check_supersedes_result() {
    let clock = start_clock();
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()).gated(gate.clone()));
    let resolver = resolver_over(backend.clone(), shared_cache(&clock), clock.clone());

    let pending = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.sign_in(Session::new("user-1", "token")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    resolver.sign_out();
    gate.notify_one();

    assert_eq!(pending.await.unwrap(), ResolveOutcome::Superseded);
    assert!(!resolver.has_access());
    assert!(resolver.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn switching_users_drops_previous_snapshot() {
    let clock = start_clock();
    let gate = Arc::new(Notify::new());
    let admin = SubscriptionStatusRecord {
        is_admin: Some(true),
        ..Default::default()
    };
    let backend = Arc::new(
        FakeBackend::new(clock.clone(), SubscriptionStatusRecord::default())
            .with_user("admin-1", admin)
            .gated(gate.clone()),
    );
    let resolver = resolver_over(backend.clone(), shared_cache(&clock), clock.clone());

    gate.notify_one();
    resolver.sign_in(Session::new("admin-1", "admin-token")).await;
    assert!(resolver.state().is_admin());

    let pending = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(resolver.state().is_loading());

    assert_eq!(
        resolver.sign_in(Session::new("guest-1", "guest-token")).await,
        ResolveOutcome::AlreadyInFlight
    );
    assert_eq!(resolver.state(), EntitlementState::default());
    assert!(!resolver.has_access());

    // Admin response is dropped, then the check runs again for the guest
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(10)).await;
    gate.notify_one();

    assert_eq!(pending.await.unwrap(), ResolveOutcome::Superseded);
    let state = resolver.state();
    assert!(!state.is_admin());
    assert!(!state.has_access());
    assert_eq!(state.phase, ResolverPhase::Resolved { stale: false });
    assert!(state.resolved_at.is_some());
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn sign_out_during_retry_delay_stops_retrying() {
    let clock = start_clock();
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()));
    backend.fail_next(StreamgateError::BackendStatus { status: 503 });
    let notifier = Arc::new(RecordingNotifier::default());
    let resolver = Arc::new(
        EntitlementResolver::new_with_clock(
            config(),
            backend.clone(),
            shared_cache(&clock),
            clock.clone(),
        )
        .unwrap()
        .with_notifier(notifier.clone()),
    );

    let pending = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.sign_in(Session::new("user-1", "token")).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(resolver.state().phase, ResolverPhase::Failed { attempt: 1 });

    resolver.sign_out();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(pending.await.unwrap(), ResolveOutcome::Superseded);
    assert_eq!(resolver.state(), EntitlementState::default());
    assert_eq!(backend.calls(), 1);
    assert!(notifier.notices.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resolvers_share_cached_status() {
    let clock = start_clock();
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()));
    let cache = shared_cache(&clock);
    let first = resolver_over(backend.clone(), cache.clone(), clock.clone());
    let second = resolver_over(backend.clone(), cache, clock.clone());

    assert_eq!(
        first.resolve("user-1", "token").await,
        ResolveOutcome::Resolved { from_cache: false }
    );
    assert_eq!(
        second.resolve("user-1", "token").await,
        ResolveOutcome::Resolved { from_cache: true }
    );
    assert_eq!(backend.calls(), 1);
    assert!(second.state().is_subscribed());
}

#[tokio::test(start_paused = true)]
async fn trial_access_ends_at_trial_end() {
    let clock = start_clock();
    let record = SubscriptionStatusRecord {
        trial: Some(TrialWindow {
            trial_start: None,
            trial_end: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }),
        ..Default::default()
    };
    let backend = Arc::new(FakeBackend::new(clock.clone(), record));
    let resolver = resolver_over(backend, shared_cache(&clock), clock.clone());

    resolver.sign_in(Session::new("user-1", "token")).await;
    assert!(resolver.state().has_trial_access());
    assert!(resolver.has_access());

    clock.set(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    resolver.refresh().await;

    let state = resolver.state();
    assert!(!state.has_trial_access());
    assert!(!state.has_access());
    assert_eq!(
        state.trial_end(),
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
}

#[tokio::test(start_paused = true)]
async fn self_grant_refreshes_snapshot() {
    let clock = start_clock();
    let backend = Arc::new(FakeBackend::new(
        clock.clone(),
        SubscriptionStatusRecord::default(),
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let resolver = Arc::new(
        EntitlementResolver::new_with_clock(
            config(),
            backend.clone(),
            shared_cache(&clock),
            clock.clone(),
        )
        .unwrap()
        .with_notifier(notifier.clone()),
    );

    resolver.sign_in(Session::new("admin-1", "token")).await;
    assert!(!resolver.has_access());

    let expires_at = resolver.grant_temp_access("admin-1", 7).await.unwrap();

    assert_eq!(expires_at, clock.now_utc() + chrono::Duration::days(7));
    let state = resolver.state();
    assert!(state.has_temp_access());
    assert_eq!(state.snapshot.temp_access_end, Some(expires_at));
    assert_eq!(backend.calls(), 2);

    let notices = notifier.notices.lock();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Info);
    assert!(notices[0].message.contains("admin-1"));
}

#[tokio::test(start_paused = true)]
async fn subscribers_observe_resolution() {
    let clock = start_clock();
    let backend = Arc::new(FakeBackend::new(clock.clone(), subscribed()));
    let resolver = resolver_over(backend, shared_cache(&clock), clock.clone());
    let mut rx = resolver.subscribe();
    assert!(!rx.borrow_and_update().has_access());

    resolver.sign_in(Session::new("user-1", "token")).await;

    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_subscribed());
}
