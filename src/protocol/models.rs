//! Backend status records and entitlement snapshot extraction.

use crate::policy::access;
use crate::StreamgateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw `check-subscription` response. Every part is independently nullable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatusRecord {
    /// Latest subscription row for the user, if any.
    #[serde(default)]
    pub subscription: Option<SubscriptionRecord>,

    /// Signup trial window, if any.
    #[serde(default)]
    pub trial: Option<TrialWindow>,

    /// Admin role membership; absent means not an admin.
    #[serde(default)]
    pub is_admin: Option<bool>,

    /// Admin-granted temporary access, if any.
    #[serde(default)]
    pub temp_access: Option<TempAccessRecord>,
}

/// Subscription row as stored by the payment webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Provider status (`active`, `trialing`, `past_due`, `canceled`, ...).
    pub status: String,

    /// Plan name (e.g., "premium").
    #[serde(default)]
    pub tier: Option<String>,

    /// End of the paid period.
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Trial window granted at signup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialWindow {
    /// When the trial began.
    #[serde(default)]
    pub trial_start: Option<DateTime<Utc>>,

    /// When the trial ends.
    #[serde(default)]
    pub trial_end: Option<DateTime<Utc>>,
}

/// Temporary access grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempAccessRecord {
    /// End of the grant.
    pub expires_at: DateTime<Utc>,

    /// Admin who granted it.
    #[serde(default)]
    pub granted_by: Option<String>,
}

/// `grant-temp-access` request body.
#[derive(Debug, Clone, Serialize)]
pub struct GrantTempAccessRequest<'a> {
    /// User receiving the grant.
    pub user_id: &'a str,

    /// Length of the grant in days.
    pub days: u32,
}

/// `grant-temp-access` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantTempAccessResponse {
    /// New expiry of the target's temporary access.
    pub expires_at: DateTime<Utc>,
}

/// Normalized entitlement facts for one user at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    /// Member of the admin role.
    pub is_admin: bool,

    /// Has an active paid subscription.
    pub is_subscribed: bool,

    /// Inside the signup trial window.
    pub has_trial_access: bool,

    /// End of the trial window, when known.
    pub trial_end: Option<DateTime<Utc>>,

    /// Holds an unexpired admin grant.
    pub has_temp_access: bool,

    /// End of the temporary grant, when present.
    pub temp_access_end: Option<DateTime<Utc>>,

    /// Subscription plan name.
    pub subscription_tier: Option<String>,

    /// End of the current subscription period.
    pub subscription_end: Option<DateTime<Utc>>,
}

impl EntitlementSnapshot {
    /// Reduce a backend record to a snapshot evaluated at `now`.
    ///
    /// Missing parts are ordinary negatives, never errors.
    pub fn from_status_record(record: &SubscriptionStatusRecord, now: DateTime<Utc>) -> Self {
        let subscription = record.subscription.as_ref();
        let trial_end = record.trial.as_ref().and_then(|t| t.trial_end);
        let temp_access_end = record.temp_access.as_ref().map(|t| t.expires_at);

        Self {
            is_admin: record.is_admin.unwrap_or(false),
            is_subscribed: subscription.is_some_and(|s| access::subscription_active(s, now)),
            has_trial_access: access::trial_active(trial_end, now),
            trial_end,
            has_temp_access: access::temp_access_active(temp_access_end, now),
            temp_access_end,
            subscription_tier: subscription.and_then(|s| s.tier.clone()),
            subscription_end: subscription.and_then(|s| s.current_period_end),
        }
    }

    /// Whether any entitlement source grants access.
    pub fn has_access(&self) -> bool {
        access::has_access(
            self.is_admin,
            self.is_subscribed,
            self.has_trial_access,
            self.has_temp_access,
        )
    }
}

/// Parse a raw `check-subscription` body.
pub fn parse_status_response(body: &[u8]) -> Result<SubscriptionStatusRecord, StreamgateError> {
    serde_json::from_slice(body).map_err(|e| {
        StreamgateError::ProtocolError(format!("Failed to parse subscription status: {}", e))
    })
}
