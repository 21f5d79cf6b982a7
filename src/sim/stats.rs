//! Phase 8: colony statistics and strategy, and Phase 9: spontaneous
//! generation.
//!
//! The recount here is the source of truth for cell counts: any drift in
//! the incremental bookkeeping of earlier phases is caught by a debug
//! assertion and repaired. Everything else is per-colony strategy state.

use std::f32::consts::TAU;

use log::debug;

use crate::genome::Genome;
use crate::rng::SimRng;
use crate::world::colony::ColonyState;
use crate::world::World;

/// Per-tick passive stress recovery.
const STRESS_DECAY: f32 = 0.002;
/// Maximum biofilm growth per tick.
const BIOFILM_GROWTH: f32 = 0.01;
/// Biofilm decay per tick once above its target.
const BIOFILM_DECAY: f32 = 0.002;

pub(crate) fn run(world: &mut World, rng: &mut SimRng) {
    // Grid is authoritative; repair counts before anything reads them.
    world.recount_cell_counts();
    world.refresh_borders();

    let mut deactivated = 0u32;
    for colony in world.colonies_mut() {
        if !colony.active {
            continue;
        }
        if colony.cell_count == 0 {
            colony.deactivate();
            deactivated += 1;
            continue;
        }

        colony.max_cell_count = colony.max_cell_count.max(colony.cell_count);
        colony.stress_level = (colony.stress_level - STRESS_DECAY).max(0.0);

        // Biofilm creeps toward what the genome is willing to invest.
        let target = colony.genome.biofilm_investment * colony.genome.biofilm_tendency;
        if colony.biofilm_strength < target {
            let step = (target - colony.biofilm_strength).min(BIOFILM_GROWTH);
            colony.biofilm_strength = (colony.biofilm_strength + step).min(1.0);
        } else {
            colony.biofilm_strength = (colony.biofilm_strength - BIOFILM_DECAY).max(0.0);
        }

        // Success memory fades; how slowly depends on the memory trait.
        let retention = 0.995 + colony.genome.memory_factor * 0.004;
        for slot in colony.success_history.iter_mut() {
            *slot = (*slot * retention).clamp(0.0, 1.0);
        }

        // A shrinking colony with a high learning rate tries a new
        // direction instead of repeating itself.
        if colony.cell_count < colony.last_population && colony.genome.learning_rate > 0.5 {
            let dir = rng.index(colony.success_history.len());
            let bump = 0.1 * colony.genome.learning_rate;
            colony.adjust_history(dir, bump);
        }

        colony.state = if colony.stress_level > colony.genome.sporulation_threshold
            && colony.genome.dormancy_threshold > 0.3
        {
            ColonyState::Dormant
        } else if colony.stress_level > 0.5 {
            ColonyState::Stressed
        } else {
            ColonyState::Normal
        };

        // Visual state: wobble advances with strict reduction into [0, 2π),
        // shape evolution into [0, 100). shape_seed never changes.
        colony.wobble_phase = (colony.wobble_phase + 0.03) % TAU;
        colony.shape_evolution = (colony.shape_evolution + 0.002) % 100.0;

        colony.last_population = colony.cell_count;
    }

    if deactivated > 0 {
        debug!("{deactivated} colonies died out this tick");
    }
}

/// Phase 9: occasionally seed a brand-new single-cell colony on empty
/// ground, as long as the world is not already crowded with species.
pub(crate) fn spontaneous_generation(world: &mut World, rng: &mut SimRng, max_active: usize) {
    if world.active_colony_count() >= max_active {
        return;
    }

    let p = 0.03 + world.empty_ratio() * 0.10;
    if !rng.chance(p as f64) {
        return;
    }

    // Up to 30 probes for an empty cell; a crowded grid just misses.
    for _ in 0..30 {
        let x = rng.range_u32(0, world.width());
        let y = rng.range_u32(0, world.height());
        if world.cells.get(x, y).is_empty() {
            let genome = Genome::random(rng);
            let id = world.spawn_colony(None, genome, 0, rng);
            world.assign_cell(x, y, id);
            debug!("spontaneous colony #{id} at ({x},{y})");
            return;
        }
    }
}
