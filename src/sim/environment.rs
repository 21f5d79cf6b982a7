//! Phase 2: environmental field update.
//!
//! The parallel part is field-local: each region task rewrites its own
//! nutrient and toxin entries from the ownership it observes. The periodic
//! disturbance runs serially afterward because one disc can straddle
//! regions.

use log::debug;

use crate::parallel::Region;
use crate::rng::SimRng;
use crate::sim::TaskContext;
use crate::world::World;

/// Mean nutrient consumption per owned cell per tick.
const CONSUMPTION: f32 = 0.05;
/// Nutrient regrowth per empty cell per tick.
const REGROWTH: f32 = 0.002;
/// Toxin secreted per owned cell per tick, scaled by the producer trait.
const TOXIN_SECRETION: f32 = 0.01;
/// Passive toxin breakdown per cell per tick.
const TOXIN_DECAY: f32 = 0.0005;

/// Ticks between disturbance rolls.
const DISTURBANCE_INTERVAL: u64 = 20;

pub(crate) fn run_region(ctx: &TaskContext, region: Region) {
    for (x, y) in region.cells() {
        let cell = ctx.cells.get(x, y);
        let mut nutrient = ctx.nutrients.get(x, y);
        let mut toxin = ctx.toxins.get(x, y);

        match ctx.colonies.get(cell.colony_id) {
            Some(colony) if !cell.is_empty() => {
                let genome = &colony.genome;
                // Consumption centers on CONSUMPTION for an average
                // resource_consumption trait of 0.5.
                let rate = CONSUMPTION * (0.5 + genome.resource_consumption);
                nutrient -= rate * genome.metabolism * (1.0 - genome.efficiency * 0.5);
                toxin += TOXIN_SECRETION * genome.toxin_production;
            }
            _ => {
                nutrient += REGROWTH;
            }
        }

        toxin -= TOXIN_DECAY;
        ctx.nutrients.set(x, y, nutrient.clamp(0.0, 1.0));
        ctx.toxins.set(x, y, toxin.clamp(0.0, 1.0));
    }
}

/// Periodic nutrient disturbance: every `DISTURBANCE_INTERVAL` ticks, with
/// 50% probability, a random disc of radius 10–30 gets per-cell nudges of
/// `(U(0,1) − 0.5)·0.4`.
pub(crate) fn disturbance(world: &mut World, rng: &mut SimRng) {
    if world.tick % DISTURBANCE_INTERVAL != 0 {
        return;
    }
    if !rng.chance(0.5) {
        return;
    }

    let radius = rng.range_u32(10, 30) as i64;
    let cx = rng.range_u32(0, world.width()) as i64;
    let cy = rng.range_u32(0, world.height()) as i64;
    debug!("nutrient disturbance at ({cx},{cy}) radius {radius}");

    let r2 = radius * radius;
    for y in (cy - radius).max(0)..=(cy + radius).min(world.height() as i64 - 1) {
        for x in (cx - radius).max(0)..=(cx + radius).min(world.width() as i64 - 1) {
            let dx = x - cx;
            let dy = y - cy;
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let nudge = (rng.uniform() as f32 - 0.5) * 0.4;
            let (x, y) = (x as u32, y as u32);
            let value = (world.nutrients.get(x, y) + nudge).clamp(0.0, 1.0);
            world.nutrients.set(x, y, value);
        }
    }
}
