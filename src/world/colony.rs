//! Colony table entries and their strategy state.

use std::f32::consts::TAU;

use crate::genome::{Genome, DIRECTION_COUNT};
use crate::rng::SimRng;

/// Maximum byte length of a colony name on the wire.
pub const MAX_NAME_LEN: usize = 32;

/// Behavioral state recomputed during the statistics phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColonyState {
    Normal,
    Stressed,
    Dormant,
}

impl ColonyState {
    /// Human-readable label, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColonyState::Normal => "normal",
            ColonyState::Stressed => "stressed",
            ColonyState::Dormant => "dormant",
        }
    }
}

/// One entry in the world's colony table.
///
/// Slots are never removed; a colony that loses its last cell is marked
/// inactive and keeps its id for stable lookup, but is no longer broadcast.
#[derive(Debug, Clone)]
pub struct Colony {
    /// Unique, monotonically assigned id. 0 is reserved for "empty".
    pub id: u32,
    /// Display name, UTF-8, at most `MAX_NAME_LEN` bytes.
    pub name: String,
    /// Id of the colony this one split from, or 0.
    pub parent_id: u32,
    /// False once the colony has lost every cell.
    pub active: bool,

    pub genome: Genome,
    /// Cached copy of `genome.body_color`.
    pub color: [u8; 3],

    /// Number of grid cells owned. Recounted from the grid every tick.
    pub cell_count: u32,
    /// High-water mark of `cell_count`. Never decreases.
    pub max_cell_count: u32,
    /// `cell_count` at the end of the previous tick; drives growth rate.
    pub last_population: u32,

    /// Accumulated stress in `[0,1]`.
    pub stress_level: f32,
    /// Biofilm protection in `[0,1]`.
    pub biofilm_strength: f32,
    /// Per-direction expansion success memory, each in `[0,1]`.
    pub success_history: [f32; DIRECTION_COUNT],
    pub state: ColonyState,

    /// Immutable key the client uses to pick a silhouette. Never 0, never
    /// changed after creation.
    pub shape_seed: u32,
    /// Animation phase in `[0, 2π)`.
    pub wobble_phase: f32,
    /// Slow silhouette drift in `[0, 100)`.
    pub shape_evolution: f32,
}

impl Colony {
    /// Create an active colony with zero cells.
    pub fn new(id: u32, name: String, genome: Genome, parent_id: u32, rng: &mut SimRng) -> Self {
        let color = genome.body_color;
        Colony {
            id,
            name,
            parent_id,
            active: true,
            genome,
            color,
            cell_count: 0,
            max_cell_count: 0,
            last_population: 0,
            stress_level: 0.0,
            biofilm_strength: 0.0,
            success_history: [0.5; DIRECTION_COUNT],
            state: ColonyState::Normal,
            shape_seed: rng.nonzero_u32(),
            // Strict reduction: the draw's upper end folds back to 0.
            wobble_phase: rng.range_f32(0.0, TAU) % TAU,
            shape_evolution: 0.0,
        }
    }

    /// True when the colony has shut down into its dormant state.
    pub fn is_dormant(&self) -> bool {
        self.state == ColonyState::Dormant
    }

    /// Cells gained (or lost, negative) since the previous tick.
    pub fn growth_rate(&self) -> f32 {
        self.cell_count as f32 - self.last_population as f32
    }

    /// Raise stress by `amount`, clamped to `[0,1]`.
    pub fn add_stress(&mut self, amount: f32) {
        self.stress_level = (self.stress_level + amount).clamp(0.0, 1.0);
    }

    /// Nudge one direction's success memory by `delta`, clamped to `[0,1]`.
    pub fn adjust_history(&mut self, dir: usize, delta: f32) {
        let slot = &mut self.success_history[dir % DIRECTION_COUNT];
        *slot = (*slot + delta).clamp(0.0, 1.0);
    }

    /// Mark the colony dead. The slot stays for id lookup.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.cell_count = 0;
    }
}

/// Syllable pool for generated names.
const SYLLABLES: [&str; 16] = [
    "ba", "cil", "lus", "mo", "vi", "ren", "ka", "thi", "or", "ux", "pla", "ger", "min", "zo",
    "fer", "al",
];

/// Deterministic colony name from the world seed and colony id.
///
/// Pure function of its inputs so names survive a replay from the same seed.
/// Always at most `MAX_NAME_LEN` bytes.
pub fn colony_name(world_seed: u64, id: u32) -> String {
    let mut state = world_seed ^ (id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    let count = 2 + (state % 2) as usize;

    let mut name = String::new();
    for i in 0..count {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let syllable = SYLLABLES[(state >> 33) as usize % SYLLABLES.len()];
        if i == 0 {
            let mut chars = syllable.chars();
            if let Some(first) = chars.next() {
                name.extend(first.to_uppercase());
                name.push_str(chars.as_str());
            }
        } else {
            name.push_str(syllable);
        }
    }
    name.push('-');
    name.push_str(&(id % 1000).to_string());
    name.truncate(MAX_NAME_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_colony(id: u32) -> Colony {
        let mut rng = SimRng::seeded(id as u64);
        let genome = Genome::random(&mut rng);
        Colony::new(id, colony_name(1, id), genome, 0, &mut rng)
    }

    #[test]
    fn test_new_colony_defaults() {
        let colony = test_colony(1);
        assert!(colony.active);
        assert_eq!(colony.cell_count, 0);
        assert_eq!(colony.parent_id, 0);
        assert_ne!(colony.shape_seed, 0);
        assert!(colony.wobble_phase >= 0.0 && colony.wobble_phase < TAU);
        assert_eq!(colony.state, ColonyState::Normal);
        assert_eq!(colony.color, colony.genome.body_color);
    }

    #[test]
    fn test_stress_clamps() {
        let mut colony = test_colony(2);
        for _ in 0..100 {
            colony.add_stress(0.02);
        }
        assert_eq!(colony.stress_level, 1.0);
        colony.add_stress(-5.0);
        assert_eq!(colony.stress_level, 0.0);
    }

    #[test]
    fn test_history_clamps() {
        let mut colony = test_colony(3);
        for _ in 0..100 {
            colony.adjust_history(2, 0.05);
        }
        assert_eq!(colony.success_history[2], 1.0);
        for _ in 0..100 {
            colony.adjust_history(2, -0.05);
        }
        assert_eq!(colony.success_history[2], 0.0);
    }

    #[test]
    fn test_deactivate() {
        let mut colony = test_colony(4);
        colony.cell_count = 17;
        colony.deactivate();
        assert!(!colony.active);
        assert_eq!(colony.cell_count, 0);
    }

    #[test]
    fn test_growth_rate_sign() {
        let mut colony = test_colony(5);
        colony.cell_count = 30;
        colony.last_population = 20;
        assert_eq!(colony.growth_rate(), 10.0);
        colony.last_population = 40;
        assert_eq!(colony.growth_rate(), -10.0);
    }

    #[test]
    fn test_colony_name_deterministic_and_bounded() {
        for id in 1..200u32 {
            let a = colony_name(99, id);
            let b = colony_name(99, id);
            assert_eq!(a, b);
            assert!(a.len() <= MAX_NAME_LEN);
            assert!(!a.is_empty());
        }
        // Different seeds give different name streams somewhere.
        let differs = (1..50u32).any(|id| colony_name(1, id) != colony_name(2, id));
        assert!(differs);
    }
}
