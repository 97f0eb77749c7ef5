//! In-memory TTL cache shared by independent callers.

pub mod sweeper;
pub mod ttl;

pub use sweeper::spawn_sweeper;
pub use ttl::{CacheEntry, TtlCache};

/// Cache key under which a user's raw subscription status record is stored.
pub fn status_key(user_id: &str) -> String {
    format!("entitlement:status:{}", user_id)
}
