pub mod constants;

pub use constants::*;

/// Current wall-clock time as epoch milliseconds.
///
/// Every persisted timestamp goes through here so records stay comparable.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
