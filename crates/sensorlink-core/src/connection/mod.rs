// ── Connection supervision ──
//
// Retry/backoff, attempt-derived health and the per-device background
// loops that keep links alive.

mod backoff;
mod health;
mod manager;

pub use backoff::Backoff;
pub use health::ConnectionHealthStore;
pub use manager::ConnectionManager;
