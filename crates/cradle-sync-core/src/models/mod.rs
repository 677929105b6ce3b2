//! Domain models for health records exchanged with the server.

mod assessment;
mod facility;
mod form;
mod patient;
mod reading;
mod referral;

pub use assessment::*;
pub use facility::*;
pub use form::*;
pub use patient::*;
pub use reading::*;
pub use referral::*;

/// Current time as unix seconds, the unit every `last_edited` and date field uses.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
