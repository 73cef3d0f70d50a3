// ── Adaptive rate control ──

mod controller;
mod table;

pub use controller::{AdaptiveRateController, FrameRateChangeListener, INITIAL_STATE_REASON};
pub use table::{DEFAULT_QUALITY, MAX_QUALITY, MIN_QUALITY, RateTable, is_valid_score};
