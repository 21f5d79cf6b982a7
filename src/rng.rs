//! Seedable random source for the simulation.
//!
//! Every stochastic decision in the pipeline routes through `SimRng` so that
//! worlds can be replayed from a seed and tests can pin outcomes. Worker
//! tasks derive their own deterministic seed per (world seed, tick, region)
//! instead of sharing one generator across threads.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Backing source for a `SimRng`.
enum Source {
    /// Normal operation: a small, fast PRNG.
    Small(SmallRng),
    /// Test operation: every uniform draw yields the same value.
    Pinned(f64),
}

/// Random source with uniform `[0,1)` and integer-range primitives.
pub struct SimRng {
    source: Source,
}

impl SimRng {
    /// Create a generator from an explicit seed.
    pub fn seeded(seed: u64) -> Self {
        SimRng {
            source: Source::Small(SmallRng::seed_from_u64(seed)),
        }
    }

    /// Create a generator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        SimRng {
            source: Source::Small(SmallRng::from_entropy()),
        }
    }

    /// Create a source whose every uniform draw returns `value`.
    ///
    /// With `value = 1.0`, every `chance` roll fails and every range draw
    /// lands on its upper end. Used by tests to switch stochastic paths off.
    pub fn pinned(value: f64) -> Self {
        SimRng {
            source: Source::Pinned(value),
        }
    }

    /// Uniform draw. `[0,1)` for seeded sources, the pinned value otherwise.
    pub fn uniform(&mut self) -> f64 {
        match &mut self.source {
            Source::Small(rng) => rng.gen::<f64>(),
            Source::Pinned(v) => *v,
        }
    }

    /// Roll an event with probability `p`. Probabilities above 1 always hit.
    pub fn chance(&mut self, p: f64) -> bool {
        self.uniform() < p
    }

    /// Uniform draw in `[lo, hi)`.
    pub fn range_f64(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.uniform() * (hi - lo)
    }

    /// Uniform draw in `[lo, hi)` as f32.
    pub fn range_f32(&mut self, lo: f32, hi: f32) -> f32 {
        self.range_f64(lo as f64, hi as f64) as f32
    }

    /// Uniform integer in `[lo, hi)`. `hi` must be greater than `lo`.
    pub fn range_u32(&mut self, lo: u32, hi: u32) -> u32 {
        match &mut self.source {
            Source::Small(rng) => rng.gen_range(lo..hi),
            Source::Pinned(v) => {
                let span = (hi - lo) as f64;
                let picked = lo + (*v * span) as u32;
                picked.min(hi - 1)
            }
        }
    }

    /// Uniform index in `[0, len)`. `len` must be nonzero.
    pub fn index(&mut self, len: usize) -> usize {
        match &mut self.source {
            Source::Small(rng) => rng.gen_range(0..len),
            Source::Pinned(v) => (((*v) * len as f64) as usize).min(len - 1),
        }
    }

    /// Raw 32-bit draw.
    pub fn next_u32(&mut self) -> u32 {
        match &mut self.source {
            Source::Small(rng) => rng.gen::<u32>(),
            Source::Pinned(v) => (*v * u32::MAX as f64) as u32,
        }
    }

    /// Raw 32-bit draw guaranteed nonzero, for shape seeds.
    pub fn nonzero_u32(&mut self) -> u32 {
        self.next_u32().max(1)
    }
}

/// Derive a deterministic seed for one region task.
///
/// splitmix64-style finalizer over the world seed, tick, and region index so
/// neighboring regions and consecutive ticks get uncorrelated streams.
pub fn derive_region_seed(world_seed: u64, tick: u64, region: usize) -> u64 {
    let mut z = world_seed
        .wrapping_add(tick.wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .wrapping_add((region as u64).wrapping_mul(0xbf58_476d_1ce4_e5b9));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = SimRng::seeded(42);
        let mut b = SimRng::seeded(42);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_uniform_in_unit_interval() {
        let mut rng = SimRng::seeded(7);
        for _ in 0..1000 {
            let v = rng.uniform();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_range_bounds() {
        let mut rng = SimRng::seeded(3);
        for _ in 0..1000 {
            let v = rng.range_u32(10, 30);
            assert!((10..30).contains(&v));
            let f = rng.range_f64(-1.0, 1.0);
            assert!((-1.0..1.0).contains(&f));
        }
    }

    #[test]
    fn test_pinned_high_never_hits() {
        let mut rng = SimRng::pinned(1.0);
        for _ in 0..100 {
            assert!(!rng.chance(0.999));
        }
        // Pinned draws still stay inside integer ranges.
        assert_eq!(rng.range_u32(0, 4), 3);
        assert_eq!(rng.index(5), 4);
    }

    #[test]
    fn test_pinned_zero_always_hits() {
        let mut rng = SimRng::pinned(0.0);
        for _ in 0..100 {
            assert!(rng.chance(0.001));
        }
    }

    #[test]
    fn test_nonzero_u32() {
        let mut rng = SimRng::pinned(0.0);
        assert_eq!(rng.nonzero_u32(), 1);
    }

    #[test]
    fn test_region_seeds_distinct() {
        let a = derive_region_seed(1, 0, 0);
        let b = derive_region_seed(1, 0, 1);
        let c = derive_region_seed(1, 1, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }
}
