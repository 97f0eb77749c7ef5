//! Access decision rules.
//!
//! Access is granted when any one source allows it:
//! - admin role membership
//! - an active (or provider-trialing) paid subscription
//! - the signup trial window
//! - an unexpired admin-granted temporary window

use crate::protocol::models::SubscriptionRecord;
use chrono::{DateTime, Utc};

/// Subscription statuses that count as paid access.
pub const ACTIVE_SUBSCRIPTION_STATUSES: &[&str] = &["active", "trialing"];

/// The access invariant: logical OR of all entitlement sources.
pub fn has_access(
    is_admin: bool,
    is_subscribed: bool,
    has_trial_access: bool,
    has_temp_access: bool,
) -> bool {
    is_admin || is_subscribed || has_trial_access || has_temp_access
}

/// A subscription counts when its status is active/trialing and its period
/// has not ended. A missing period end is treated as open-ended.
pub fn subscription_active(subscription: &SubscriptionRecord, now: DateTime<Utc>) -> bool {
    let status_ok = ACTIVE_SUBSCRIPTION_STATUSES
        .iter()
        .any(|s| subscription.status.eq_ignore_ascii_case(s));

    status_ok
        && subscription
            .current_period_end
            .map_or(true, |end| now < end)
}

/// The trial grants access strictly before its end.
pub fn trial_active(trial_end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    trial_end.is_some_and(|end| now < end)
}

/// A temporary grant is active strictly before it expires.
pub fn temp_access_active(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|end| now < end)
}
