//! Phase 6: division by connected components.
//!
//! Serial. A colony whose cells have split into several 4-connected
//! components keeps its largest component; other fragments become child
//! colonies or, below the viability threshold, die off. At most one colony
//! divides per tick so population structure changes gradually.

use log::debug;

use crate::rng::SimRng;
use crate::world::grid::{CARDINAL_DIRS, EMPTY};
use crate::world::World;

/// Fragments below this size are cleared instead of founding a colony.
const MIN_FRAGMENT_SIZE: u32 = 5;
/// Component label cap; `component_id` is an i8 and -1 means unlabeled.
/// Cells left unlabeled are picked up on the next tick.
const MAX_COMPONENTS: usize = 127;

pub(crate) fn run(world: &mut World, rng: &mut SimRng) {
    // One grid scan groups every owned cell by colony slot.
    let slots = world.colonies().len();
    let slot_of: ahash::AHashMap<u32, usize> = world
        .colonies()
        .iter()
        .enumerate()
        .map(|(slot, c)| (c.id, slot))
        .collect();

    let mut positions: Vec<Vec<(u32, u32)>> = vec![Vec::new(); slots];
    for y in 0..world.height() {
        for x in 0..world.width() {
            let id = world.cells.get(x, y).colony_id;
            if id == EMPTY {
                continue;
            }
            if let Some(&slot) = slot_of.get(&id) {
                positions[slot].push((x, y));
            }
        }
    }

    for slot in 0..slots {
        let (id, active) = {
            let colony = &world.colonies()[slot];
            (colony.id, colony.active)
        };
        if !active || positions[slot].len() < 2 {
            continue;
        }

        if split_colony(world, id, &positions[slot], rng) {
            // At most one division per tick.
            return;
        }
    }
}

/// Label the colony's components and split if there is more than one.
/// Returns true when a division actually happened.
fn split_colony(world: &mut World, id: u32, cells: &[(u32, u32)], rng: &mut SimRng) -> bool {
    // Reset scratch labels for this colony's cells.
    for &(x, y) in cells {
        world.cells.update(x, y, |c| c.component_id = -1);
    }

    let sizes = label_components(world, id, cells);
    if sizes.len() <= 1 {
        clear_labels(world, cells);
        return false;
    }

    // The largest component keeps the original identity.
    let keep = sizes
        .iter()
        .enumerate()
        .max_by_key(|(_, &size)| size)
        .map(|(label, _)| label as i8)
        .unwrap_or(0);

    let (parent_seed, parent_genome) = match world.colony(id) {
        Some(colony) => (colony.shape_seed, colony.genome.clone()),
        None => {
            clear_labels(world, cells);
            return false;
        }
    };

    for (label, &size) in sizes.iter().enumerate() {
        let label = label as i8;
        if label == keep {
            continue;
        }

        let fragment: Vec<(u32, u32)> = cells
            .iter()
            .copied()
            .filter(|&(x, y)| {
                let cell = world.cells.get(x, y);
                cell.colony_id == id && cell.component_id == label
            })
            .collect();

        if size >= MIN_FRAGMENT_SIZE {
            let mut genome = parent_genome.clone();
            genome.mutate(rng);
            let child = world.spawn_colony(None, genome, id, rng);
            // Children inherit a recognizably related silhouette.
            if let Some(colony) = world.colony_mut(child) {
                colony.shape_seed = (parent_seed ^ rng.nonzero_u32()).max(1);
            }
            for (x, y) in &fragment {
                world.assign_cell(*x, *y, child);
            }
            debug!("colony #{id} divided: component of {size} cells became #{child}");
        } else {
            // Too small to survive on its own.
            for (x, y) in &fragment {
                world.assign_cell(*x, *y, EMPTY);
            }
            debug!("colony #{id} shed a fragment of {size} cells");
        }
    }

    clear_labels(world, cells);
    true
}

/// Flood-fill 4-connected components with an explicit stack, labeling cells
/// `0..k-1` and returning each component's size. Labeling stops at
/// `MAX_COMPONENTS`; unlabeled cells wait for the next tick.
fn label_components(world: &World, id: u32, cells: &[(u32, u32)]) -> Vec<u32> {
    let mut sizes = Vec::new();
    let mut stack = Vec::new();

    for &(x, y) in cells {
        let cell = world.cells.get(x, y);
        if cell.colony_id != id || cell.component_id != -1 {
            continue;
        }
        if sizes.len() >= MAX_COMPONENTS {
            break;
        }

        let label = sizes.len() as i8;
        let mut size = 0u32;
        world.cells.update(x, y, |c| c.component_id = label);
        stack.push((x, y));

        while let Some((cx, cy)) = stack.pop() {
            size += 1;
            for dir in CARDINAL_DIRS {
                if let Some((nx, ny)) = world.cells.neighbor(cx, cy, dir) {
                    let neighbor = world.cells.get(nx, ny);
                    if neighbor.colony_id == id && neighbor.component_id == -1 {
                        world.cells.update(nx, ny, |c| c.component_id = label);
                        stack.push((nx, ny));
                    }
                }
            }
        }
        sizes.push(size);
    }
    sizes
}

/// Restore the "no flood fill in progress" state.
fn clear_labels(world: &World, cells: &[(u32, u32)]) {
    for &(x, y) in cells {
        world.cells.update(x, y, |c| c.component_id = -1);
    }
}
