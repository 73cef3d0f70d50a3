use serde::{Deserialize, Serialize};

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 5;
/// Score assumed before the first sample, and the tier used for scores
/// outside `MIN_QUALITY..=MAX_QUALITY`.
pub const DEFAULT_QUALITY: u8 = 3;

pub fn is_valid_score(score: u8) -> bool {
    (MIN_QUALITY..=MAX_QUALITY).contains(&score)
}

/// Quality score to frame rate lookup, one tier per score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable([f64; 5]);

impl Default for RateTable {
    fn default() -> Self {
        Self([0.5, 1.0, 2.0, 3.0, 5.0])
    }
}

impl RateTable {
    /// `rates[0]` is used for score 1, `rates[4]` for score 5.
    pub fn new(rates: [f64; 5]) -> Self {
        Self(rates)
    }

    pub fn rates(&self) -> &[f64; 5] {
        &self.0
    }

    /// Rate for a score. Unknown scores fall back to the default tier.
    pub fn rate_for(&self, score: u8) -> f64 {
        let tier = if is_valid_score(score) {
            score
        } else {
            DEFAULT_QUALITY
        };
        self.0
            .get(usize::from(tier - MIN_QUALITY))
            .copied()
            .unwrap_or(self.0[2])
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.0.iter().all(|r| r.is_finite() && *r > 0.0)
            && self.0.windows(2).all(|pair| pair[0] < pair[1])
    }
}
