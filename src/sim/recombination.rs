//! Phase 7: recombination of related colonies.
//!
//! Serial, at most one merge per tick. Two adjacent colonies that are close
//! kin (parent and child, or siblings) and still genetically similar fuse
//! back together: the smaller dissolves into the larger and the survivor's
//! genome becomes the cell-weighted blend of both.

use log::debug;

use crate::genome::Genome;
use crate::world::colony::Colony;
use crate::world::grid::EMPTY;
use crate::world::World;

/// Base genetic-distance threshold below which kin merge.
const MERGE_BASE_THRESHOLD: f32 = 0.05;

pub(crate) fn run(world: &mut World) {
    // Row-major scan; each unordered pair is seen once via east/south.
    for y in 0..world.height() {
        for x in 0..world.width() {
            let a = world.cells.get(x, y).colony_id;
            if a == EMPTY {
                continue;
            }
            for (dx, dy) in [(1i64, 0i64), (0, 1)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if !world.cells.in_bounds(nx, ny) {
                    continue;
                }
                let b = world.cells.get(nx as u32, ny as u32).colony_id;
                if b == EMPTY || b == a {
                    continue;
                }

                if try_merge(world, a, b) {
                    // At most one merge per tick.
                    return;
                }
            }
        }
    }
}

/// True when the colonies are parent/child or share a parent.
fn related(a: &Colony, b: &Colony) -> bool {
    a.parent_id == b.id
        || b.parent_id == a.id
        || (a.parent_id != 0 && a.parent_id == b.parent_id)
}

/// Merge `a` and `b` if they are related and genetically close enough.
fn try_merge(world: &mut World, a: u32, b: u32) -> bool {
    let (distance, threshold, larger, smaller) = {
        let (Some(ca), Some(cb)) = (world.colony(a), world.colony(b)) else {
            return false;
        };
        if !ca.active || !cb.active || !related(ca, cb) {
            return false;
        }

        let distance = ca.genome.distance(&cb.genome);
        let affinity = (ca.genome.merge_affinity + cb.genome.merge_affinity) / 2.0;
        let threshold = MERGE_BASE_THRESHOLD + affinity * 0.1;

        // Ties go to the elder (lower id keeps its identity).
        let (larger, smaller) = if ca.cell_count >= cb.cell_count {
            (a, b)
        } else {
            (b, a)
        };
        (distance, threshold, larger, smaller)
    };

    if distance > threshold {
        return false;
    }

    let merged_genome = {
        let (Some(cl), Some(cs)) = (world.colony(larger), world.colony(smaller)) else {
            return false;
        };
        Genome::merge(
            &cl.genome,
            &cs.genome,
            cl.cell_count as f32,
            cs.cell_count as f32,
        )
    };

    // Hand every cell of the smaller colony to the larger one.
    for y in 0..world.height() {
        for x in 0..world.width() {
            if world.cells.get(x, y).colony_id == smaller {
                world.assign_cell(x, y, larger);
            }
        }
    }

    if let Some(survivor) = world.colony_mut(larger) {
        survivor.color = merged_genome.body_color;
        survivor.genome = merged_genome;
    }
    if let Some(dissolved) = world.colony_mut(smaller) {
        dissolved.deactivate();
    }
    debug!("colony #{smaller} recombined into #{larger} (distance {distance:.3})");
    true
}
