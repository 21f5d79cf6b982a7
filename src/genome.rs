//! Colony genomes: fixed-shape trait vectors and their operators.
//!
//! A genome is a set of normalized behavioral traits plus an 8-way
//! directional weight table and a display color. The simulation reads traits
//! during every phase; the operators here (random construction, bounded
//! mutation, pairwise distance, weighted merge) are the only ways genomes
//! change.

use crate::rng::SimRng;

/// Number of compass directions in the spread weight table.
pub const DIRECTION_COUNT: usize = 8;

/// A colony's heritable traits.
///
/// All scalar traits live in `[0,1]` except `edge_affinity`, which lives in
/// `[-1,1]`. Every write path clamps back into range.
#[derive(Debug, Clone, PartialEq)]
pub struct Genome {
    // Growth
    pub spread_rate: f32,
    pub metabolism: f32,
    pub efficiency: f32,
    pub mutation_rate: f32,

    // Environment
    pub nutrient_sensitivity: f32,
    pub toxin_sensitivity: f32,
    pub toxin_resistance: f32,
    pub edge_affinity: f32,
    pub quorum_threshold: f32,
    pub density_tolerance: f32,

    // Combat
    pub aggression: f32,
    pub resilience: f32,
    pub toxin_production: f32,
    pub defense_priority: f32,

    // Social
    pub merge_affinity: f32,
    pub biofilm_investment: f32,
    pub biofilm_tendency: f32,
    pub learning_rate: f32,
    pub memory_factor: f32,
    pub sporulation_threshold: f32,
    pub dormancy_threshold: f32,
    pub resource_consumption: f32,

    // Directional preference over N, NE, E, SE, S, SW, W, NW.
    pub spread_weights: [f32; DIRECTION_COUNT],

    // Display
    pub body_color: [u8; 3],
}

/// Clamp a trait into `[0,1]`.
fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

impl Genome {
    /// Build a genome with every trait drawn uniformly from its range.
    pub fn random(rng: &mut SimRng) -> Self {
        let mut spread_weights = [0.0f32; DIRECTION_COUNT];
        for w in spread_weights.iter_mut() {
            *w = rng.range_f32(0.0, 1.0);
        }

        // Bias colors away from black so colonies stay visible on terminals.
        let body_color = [
            rng.range_u32(60, 256) as u8,
            rng.range_u32(60, 256) as u8,
            rng.range_u32(60, 256) as u8,
        ];

        Genome {
            spread_rate: rng.range_f32(0.0, 1.0),
            metabolism: rng.range_f32(0.0, 1.0),
            efficiency: rng.range_f32(0.0, 1.0),
            mutation_rate: rng.range_f32(0.0, 1.0),
            nutrient_sensitivity: rng.range_f32(0.0, 1.0),
            toxin_sensitivity: rng.range_f32(0.0, 1.0),
            toxin_resistance: rng.range_f32(0.0, 1.0),
            edge_affinity: rng.range_f32(-1.0, 1.0),
            quorum_threshold: rng.range_f32(0.0, 1.0),
            density_tolerance: rng.range_f32(0.0, 1.0),
            aggression: rng.range_f32(0.0, 1.0),
            resilience: rng.range_f32(0.0, 1.0),
            toxin_production: rng.range_f32(0.0, 1.0),
            defense_priority: rng.range_f32(0.0, 1.0),
            merge_affinity: rng.range_f32(0.0, 1.0),
            biofilm_investment: rng.range_f32(0.0, 1.0),
            biofilm_tendency: rng.range_f32(0.0, 1.0),
            learning_rate: rng.range_f32(0.0, 1.0),
            memory_factor: rng.range_f32(0.0, 1.0),
            sporulation_threshold: rng.range_f32(0.0, 1.0),
            dormancy_threshold: rng.range_f32(0.0, 1.0),
            resource_consumption: rng.range_f32(0.0, 1.0),
            spread_weights,
            body_color,
        }
    }

    /// Perturb the genome in place.
    ///
    /// Each scalar trait has an independent 30% chance of shifting by up to
    /// ±0.08; directional weights mutate the same way. The color drifts by a
    /// few steps per channel so lineages stay visually recognizable.
    pub fn mutate(&mut self, rng: &mut SimRng) {
        const TRAIT_CHANCE: f64 = 0.3;
        const TRAIT_STEP: f32 = 0.08;

        for (trait_ref, lo) in self.scalar_traits_mut() {
            if rng.chance(TRAIT_CHANCE) {
                let delta = rng.range_f32(-TRAIT_STEP, TRAIT_STEP);
                *trait_ref = (*trait_ref + delta).clamp(lo, 1.0);
            }
        }

        for w in self.spread_weights.iter_mut() {
            if rng.chance(TRAIT_CHANCE) {
                let delta = rng.range_f32(-TRAIT_STEP, TRAIT_STEP);
                *w = clamp01(*w + delta);
            }
        }

        for channel in self.body_color.iter_mut() {
            if rng.chance(TRAIT_CHANCE) {
                let delta = rng.range_f32(-12.0, 12.0) as i16;
                *channel = (*channel as i16 + delta).clamp(40, 255) as u8;
            }
        }
    }

    /// Mean absolute difference across all scalar traits and weights.
    ///
    /// Values land in `[0,1]`; identical genomes score 0. Color is ignored:
    /// it is display state, not behavior.
    pub fn distance(&self, other: &Genome) -> f32 {
        let a = self.scalar_traits();
        let b = other.scalar_traits();

        let mut total = 0.0f32;
        for (&x, &y) in a.iter().zip(b.iter()) {
            total += (x - y).abs();
        }
        // edge_affinity spans twice the range of the other traits.
        total -= (self.edge_affinity - other.edge_affinity).abs() * 0.5;

        for (x, y) in self.spread_weights.iter().zip(other.spread_weights.iter()) {
            total += (x - y).abs();
        }

        total / (SCALAR_TRAIT_COUNT + DIRECTION_COUNT) as f32
    }

    /// Weighted average of two genomes.
    ///
    /// `weight_a` and `weight_b` are typically cell counts; the result leans
    /// toward the larger contributor. Colors blend with the same weights.
    pub fn merge(a: &Genome, b: &Genome, weight_a: f32, weight_b: f32) -> Genome {
        let total = (weight_a + weight_b).max(1.0);
        let fa = weight_a / total;
        let fb = weight_b / total;

        let mut merged = a.clone();
        {
            let bv = b.scalar_traits();
            for (i, (trait_ref, lo)) in merged.scalar_traits_mut().into_iter().enumerate() {
                *trait_ref = (*trait_ref * fa + bv[i] * fb).clamp(lo, 1.0);
            }
        }

        for (i, w) in merged.spread_weights.iter_mut().enumerate() {
            *w = clamp01(*w * fa + b.spread_weights[i] * fb);
        }

        for (i, channel) in merged.body_color.iter_mut().enumerate() {
            let blended = *channel as f32 * fa + b.body_color[i] as f32 * fb;
            *channel = blended.round().clamp(0.0, 255.0) as u8;
        }

        merged
    }

    /// Directional weight for one of the 8 compass directions.
    pub fn direction_weight(&self, dir: usize) -> f32 {
        self.spread_weights[dir % DIRECTION_COUNT]
    }

    /// Snapshot of every scalar trait, in declaration order.
    fn scalar_traits(&self) -> [f32; SCALAR_TRAIT_COUNT] {
        [
            self.spread_rate,
            self.metabolism,
            self.efficiency,
            self.mutation_rate,
            self.nutrient_sensitivity,
            self.toxin_sensitivity,
            self.toxin_resistance,
            self.edge_affinity,
            self.quorum_threshold,
            self.density_tolerance,
            self.aggression,
            self.resilience,
            self.toxin_production,
            self.defense_priority,
            self.merge_affinity,
            self.biofilm_investment,
            self.biofilm_tendency,
            self.learning_rate,
            self.memory_factor,
            self.sporulation_threshold,
            self.dormancy_threshold,
            self.resource_consumption,
        ]
    }

    /// Mutable references to every scalar trait with its lower clamp bound.
    fn scalar_traits_mut(&mut self) -> [(&mut f32, f32); SCALAR_TRAIT_COUNT] {
        [
            (&mut self.spread_rate, 0.0),
            (&mut self.metabolism, 0.0),
            (&mut self.efficiency, 0.0),
            (&mut self.mutation_rate, 0.0),
            (&mut self.nutrient_sensitivity, 0.0),
            (&mut self.toxin_sensitivity, 0.0),
            (&mut self.toxin_resistance, 0.0),
            (&mut self.edge_affinity, -1.0),
            (&mut self.quorum_threshold, 0.0),
            (&mut self.density_tolerance, 0.0),
            (&mut self.aggression, 0.0),
            (&mut self.resilience, 0.0),
            (&mut self.toxin_production, 0.0),
            (&mut self.defense_priority, 0.0),
            (&mut self.merge_affinity, 0.0),
            (&mut self.biofilm_investment, 0.0),
            (&mut self.biofilm_tendency, 0.0),
            (&mut self.learning_rate, 0.0),
            (&mut self.memory_factor, 0.0),
            (&mut self.sporulation_threshold, 0.0),
            (&mut self.dormancy_threshold, 0.0),
            (&mut self.resource_consumption, 0.0),
        ]
    }
}

/// Number of scalar traits in the genome.
const SCALAR_TRAIT_COUNT: usize = 22;

#[cfg(test)]
mod tests {
    use super::*;

    fn in_range(genome: &Genome) -> bool {
        let scalars = genome.scalar_traits();
        let mut ok = scalars.iter().all(|v| (-1.0..=1.0).contains(v));
        // Only edge_affinity may go negative.
        ok &= scalars
            .iter()
            .enumerate()
            .all(|(i, v)| i == 7 || *v >= 0.0);
        ok && genome.spread_weights.iter().all(|w| (0.0..=1.0).contains(w))
    }

    #[test]
    fn test_random_genome_in_range() {
        let mut rng = SimRng::seeded(11);
        for _ in 0..50 {
            let genome = Genome::random(&mut rng);
            assert!(in_range(&genome));
        }
    }

    #[test]
    fn test_mutation_stays_in_range() {
        let mut rng = SimRng::seeded(12);
        let mut genome = Genome::random(&mut rng);
        for _ in 0..500 {
            genome.mutate(&mut rng);
            assert!(in_range(&genome));
        }
    }

    #[test]
    fn test_distance_zero_for_identical() {
        let mut rng = SimRng::seeded(13);
        let genome = Genome::random(&mut rng);
        assert_eq!(genome.distance(&genome), 0.0);
    }

    #[test]
    fn test_distance_symmetric_and_positive() {
        let mut rng = SimRng::seeded(14);
        let a = Genome::random(&mut rng);
        let b = Genome::random(&mut rng);
        let d_ab = a.distance(&b);
        let d_ba = b.distance(&a);
        assert!(d_ab > 0.0);
        assert!((d_ab - d_ba).abs() < 1e-6);
    }

    #[test]
    fn test_distance_grows_with_mutation() {
        let mut rng = SimRng::seeded(15);
        let original = Genome::random(&mut rng);
        let mut drifted = original.clone();
        for _ in 0..50 {
            drifted.mutate(&mut rng);
        }
        assert!(original.distance(&drifted) > 0.0);
    }

    #[test]
    fn test_merge_weights_pull_toward_heavier_side() {
        let mut rng = SimRng::seeded(16);
        let mut a = Genome::random(&mut rng);
        let mut b = Genome::random(&mut rng);
        a.aggression = 0.0;
        b.aggression = 1.0;

        let merged = Genome::merge(&a, &b, 900.0, 100.0);
        assert!((merged.aggression - 0.1).abs() < 1e-4);

        let merged = Genome::merge(&a, &b, 100.0, 900.0);
        assert!((merged.aggression - 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_merge_stays_in_range() {
        let mut rng = SimRng::seeded(17);
        let a = Genome::random(&mut rng);
        let b = Genome::random(&mut rng);
        let merged = Genome::merge(&a, &b, 3.0, 5.0);
        assert!(in_range(&merged));
    }

    #[test]
    fn test_direction_weight_wraps() {
        let mut rng = SimRng::seeded(18);
        let genome = Genome::random(&mut rng);
        assert_eq!(genome.direction_weight(0), genome.spread_weights[0]);
        assert_eq!(genome.direction_weight(9), genome.spread_weights[1]);
    }
}
