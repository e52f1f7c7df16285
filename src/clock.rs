/// Clock helpers shared by the store, the conversation and the sweeper
///
/// Time is always read through an injected `mockable::Clock` so expiry logic can be
/// driven deterministically in tests.
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use mockable::{Clock, DefaultClock};

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Production clock
pub fn system_clock() -> SharedClock {
    Arc::new(DefaultClock)
}

/// Drop sub-millisecond precision so a timestamp survives a store round trip unchanged
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
