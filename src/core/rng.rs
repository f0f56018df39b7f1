//! Seedable random source shared by one combat session

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cell::RefCell;

/// Single RNG per session so a seed reproduces every roll in order
#[derive(Debug)]
pub struct SessionRng {
    rng: RefCell<ChaCha8Rng>,
    seed: u64,
}

impl SessionRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(seed)),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Roll a die with N sides (1-N inclusive)
    pub fn roll_die(&self, sides: u32) -> u32 {
        if sides <= 1 {
            return 1;
        }
        self.rng.borrow_mut().gen_range(1..=sides)
    }

    pub fn d20(&self) -> u32 {
        self.roll_die(20)
    }

    /// True with the given probability (clamped to 0..=1, NaN never fires)
    pub fn chance(&self, probability: f64) -> bool {
        if probability.is_nan() {
            return false;
        }
        let p = probability.clamp(0.0, 1.0);
        self.rng.borrow_mut().gen_bool(p)
    }
}

impl Default for SessionRng {
    fn default() -> Self {
        Self::from_seed(0)
    }
}
