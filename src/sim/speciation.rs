//! Phase 5: mutation and speciation.
//!
//! Serial. Each colony may drift its genome; a large enough drift on a
//! large enough colony founds a new species that takes part of the parent's
//! territory, while the parent keeps its pre-mutation genome.

use log::debug;

use crate::rng::SimRng;
use crate::world::World;

/// Colonies at or below this size never speciate.
const MIN_SPECIATION_SIZE: u32 = 10;
/// Above this size the speciation roll is boosted.
const BOOSTED_SIZE: u32 = 30;

pub(crate) fn run(world: &mut World, rng: &mut SimRng) {
    // New colonies appended during the loop are not revisited this tick.
    let slots = world.colonies().len();

    for slot in 0..slots {
        let (id, cell_count, stress, mutation_rate) = {
            let colony = &world.colonies()[slot];
            if !colony.active || colony.cell_count == 0 {
                continue;
            }
            (
                colony.id,
                colony.cell_count,
                colony.stress_level,
                colony.genome.mutation_rate,
            )
        };

        let trigger = (0.08 + mutation_rate * 0.6)
            * (1.0 + stress * 2.5)
            * (1.0 + cell_count as f32 / 300.0);
        if !rng.chance((trigger as f64).min(1.0)) {
            continue;
        }

        let original = world.colonies()[slot].genome.clone();
        let mut mutated = original.clone();
        mutated.mutate(rng);
        let distance = original.distance(&mutated);

        let mut speciation_chance = 0.05 + distance * 0.3;
        if cell_count > BOOSTED_SIZE {
            speciation_chance *= 1.5;
        }

        if cell_count > MIN_SPECIATION_SIZE && rng.chance((speciation_chance as f64).min(1.0)) {
            // Found a new species; the parent reverts to its old genome,
            // which it still holds since we only mutated a copy.
            let child = world.spawn_colony(None, mutated, id, rng);
            let moved = transfer_cells(world, id, child, rng);
            debug!(
                "colony #{id} speciated into #{child} ({moved} cells, distance {distance:.3})"
            );
        } else {
            // Plain drift: the mutation lands on the colony itself.
            if let Some(colony) = world.colony_mut(id) {
                colony.color = mutated.body_color;
                colony.genome = mutated;
            }
        }
    }
}

/// Move a random 20–50% of the parent's cells to the child.
///
/// Border cells defect more readily than interior ones. Returns the number
/// of cells moved.
fn transfer_cells(world: &mut World, parent_id: u32, child_id: u32, rng: &mut SimRng) -> u32 {
    let parent_count = match world.colony(parent_id) {
        Some(colony) => colony.cell_count,
        None => return 0,
    };
    let fraction = rng.range_f32(0.2, 0.5);
    let target = ((parent_count as f32 * fraction) as u32).max(1);

    // One scan to collect the parent's cells.
    let mut positions = Vec::with_capacity(parent_count as usize);
    for y in 0..world.height() {
        for x in 0..world.width() {
            let cell = world.cells.get(x, y);
            if cell.colony_id == parent_id {
                positions.push((x, y, cell.is_border));
            }
        }
    }

    let mut moved = 0;
    for (x, y, is_border) in positions {
        if moved >= target {
            break;
        }
        let acceptance = if is_border { 0.6 } else { 0.3 };
        if rng.chance(acceptance) {
            world.assign_cell(x, y, child_id);
            moved += 1;
        }
    }
    moved
}
