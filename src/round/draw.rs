//! Stake-weighted winner selection
//!
//! The draw value is injected so the walk itself stays deterministic; the
//! randomness provider lives behind [`RandomnessSource`].

use crate::errors::DrawError;
use crate::round::types::Stake;
use rand::Rng;
use std::sync::Mutex;

/// Supplies uniform draw values
pub trait RandomnessSource: Send + Sync {
    /// Uniform value in `[0, upper)`. `upper` is always non-zero.
    fn draw_below(&self, upper: u128) -> u128;
}

/// Thread-local RNG from `rand`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl RandomnessSource for ThreadRngSource {
    fn draw_below(&self, upper: u128) -> u128 {
        rand::thread_rng().gen_range(0..upper)
    }
}

/// Seedable source, useful for replaying a sequence of draws
pub struct SeededSource {
    rng: Mutex<rand::rngs::StdRng>,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            rng: Mutex::new(rand::rngs::StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomnessSource for SeededSource {
    fn draw_below(&self, upper: u128) -> u128 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..upper),
            Err(poisoned) => poisoned.into_inner().gen_range(0..upper),
        }
    }
}

/// Sum of all stake amounts, widened so large pots cannot overflow
pub fn total_weight(stakes: &[Stake]) -> u128 {
    stakes.iter().map(|s| s.amount as u128).sum()
}

/// Walk stakes in join order and return the first whose cumulative sum exceeds `r`.
pub fn select_winner(stakes: &[Stake], r: u128) -> Result<&Stake, DrawError> {
    if stakes.is_empty() {
        return Err(DrawError::InvalidInput("stake list is empty".to_string()));
    }

    let total = total_weight(stakes);
    if total == 0 {
        return Err(DrawError::InvalidInput("total stake is zero".to_string()));
    }
    if r >= total {
        return Err(DrawError::InvalidInput(format!(
            "draw value {} outside [0, {})",
            r, total
        )));
    }

    let mut cumulative: u128 = 0;
    for stake in stakes {
        cumulative += stake.amount as u128;
        if cumulative > r {
            return Ok(stake);
        }
    }

    // r < total guarantees the loop returns
    Err(DrawError::InvalidInput("draw walked past the last stake".to_string()))
}

/// Draw a winner using `source`
pub fn draw<'a>(stakes: &'a [Stake], source: &dyn RandomnessSource) -> Result<&'a Stake, DrawError> {
    let total = total_weight(stakes);
    if total == 0 {
        return select_winner(stakes, 0);
    }
    select_winner(stakes, source.draw_below(total))
}

/// Each stake's share of the pot, in join order
pub fn win_probabilities(stakes: &[Stake]) -> Vec<f64> {
    let total = total_weight(stakes);
    stakes
        .iter()
        .map(|s| {
            if total == 0 {
                0.0
            } else {
                s.amount as f64 / total as f64
            }
        })
        .collect()
}
