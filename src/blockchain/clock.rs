use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Last timestamp handed out, in milliseconds since the UNIX epoch
static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Returns the current wall-clock time in millisecond precision
///
/// Successive calls within one process never go backwards, even if the
/// system clock is adjusted. Clocks of different nodes are not synchronized.
pub fn now() -> DateTime<Utc> {
    let wall = Utc::now().timestamp_millis();
    let previous = LAST_MILLIS.fetch_max(wall, Ordering::SeqCst);
    let millis = previous.max(wall);

    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// Returns the current time as epoch milliseconds
pub fn now_millis() -> i64 {
    now().timestamp_millis()
}
