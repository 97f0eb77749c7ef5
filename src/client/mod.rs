//! Backend query surface.

pub mod http;

use crate::protocol::models::SubscriptionStatusRecord;
use crate::StreamgateError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Backend operations the resolver depends on.
#[async_trait]
pub trait EntitlementBackend: Send + Sync {
    /// Fetch admin flag, subscription, trial window and temporary grant for `user_id`.
    async fn fetch_status(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<SubscriptionStatusRecord, StreamgateError>;

    /// Grant `target_user_id` temporary access for `days` days.
    ///
    /// Returns the new expiry.
    async fn grant_temp_access(
        &self,
        target_user_id: &str,
        days: u32,
        access_token: &str,
    ) -> Result<DateTime<Utc>, StreamgateError>;
}
