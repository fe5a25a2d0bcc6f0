//! The process-wide current time.
//!
//! One worker in the group refreshes the value once per second from a
//! periodic timer event; everyone else reads it lock-free. Readers may see
//! a value up to about a second stale, which is exactly what connection
//! deadlines need.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static CURRENT: AtomicI64 = AtomicI64::new(0);

/// Unix time in seconds, at most ~1 s stale.
pub fn now() -> i64 {
    match CURRENT.load(Ordering::Relaxed) {
        0 => update(),
        t => t,
    }
}

/// Refreshes the shared value from the system clock. Single writer.
pub fn update() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    CURRENT.store(now, Ordering::Relaxed);
    now
}
