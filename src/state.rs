//! Reactive entitlement state exposed to presentation code.

use crate::protocol::models::EntitlementSnapshot;
use chrono::{DateTime, Utc};

/// Where the resolver is in its check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverPhase {
    /// Mounted, nothing checked yet.
    #[default]
    Idle,
    /// A backend query is in flight.
    Checking,
    /// An attempt failed and a retry is pending.
    Failed {
        /// Attempt number that failed (1-based).
        attempt: u32,
    },
    /// A snapshot is in effect.
    Resolved {
        /// True when the last check gave up and the previous snapshot was kept.
        stale: bool,
    },
}

/// What subscribers observe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntitlementState {
    /// Snapshot currently in effect.
    pub snapshot: EntitlementSnapshot,

    /// Cycle phase.
    pub phase: ResolverPhase,

    /// When `snapshot` was last confirmed by the backend.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl EntitlementState {
    /// A check is running.
    pub fn is_loading(&self) -> bool {
        matches!(self.phase, ResolverPhase::Checking | ResolverPhase::Failed { .. })
    }

    /// Derived access decision.
    pub fn has_access(&self) -> bool {
        self.snapshot.has_access()
    }

    /// Shorthand for `snapshot.is_subscribed`.
    pub fn is_subscribed(&self) -> bool {
        self.snapshot.is_subscribed
    }

    /// Shorthand for `snapshot.is_admin`.
    pub fn is_admin(&self) -> bool {
        self.snapshot.is_admin
    }

    /// Shorthand for `snapshot.has_trial_access`.
    pub fn has_trial_access(&self) -> bool {
        self.snapshot.has_trial_access
    }

    /// Shorthand for `snapshot.has_temp_access`.
    pub fn has_temp_access(&self) -> bool {
        self.snapshot.has_temp_access
    }

    /// Shorthand for `snapshot.subscription_tier`.
    pub fn subscription_tier(&self) -> Option<&str> {
        self.snapshot.subscription_tier.as_deref()
    }

    /// Shorthand for `snapshot.subscription_end`.
    pub fn subscription_end(&self) -> Option<DateTime<Utc>> {
        self.snapshot.subscription_end
    }

    /// Shorthand for `snapshot.trial_end`.
    pub fn trial_end(&self) -> Option<DateTime<Utc>> {
        self.snapshot.trial_end
    }
}
