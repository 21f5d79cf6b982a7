//! Phase 3/3b: spread and combat proposals.
//!
//! For every owned cell in the region, each cardinal neighbor is considered
//! once: empty neighbors may be colonized, enemy neighbors may be attacked.
//! Nothing here touches the grid; proposals go into the region's pending
//! buffer and success-history adjustments are deferred to the commit phase.

use std::sync::Mutex;

use crate::parallel::Region;
use crate::rng::SimRng;
use crate::sim::{RegionScratch, TaskContext};
use crate::world::colony::Colony;
use crate::world::grid::{SyncGrid, Cell, CARDINAL_DIRS, EMPTY, NEIGHBOR_OFFSETS};

/// Lower and upper clamp for the combined environment modifier.
const ENV_MODIFIER_MIN: f32 = 0.3;
const ENV_MODIFIER_MAX: f32 = 2.0;

/// Learning step applied to success history on a combat win or loss.
const LEARNING_STEP: f32 = 0.05;

pub(crate) fn run_region(
    ctx: &TaskContext,
    region: Region,
    scratch: &Mutex<RegionScratch>,
    seed: u64,
) {
    let mut rng = SimRng::seeded(seed);
    let mut proposals: Vec<(u32, u32, u32)> = Vec::new();
    let mut history: Vec<(u32, usize, f32)> = Vec::new();

    for (x, y) in region.cells() {
        let cell = ctx.cells.get(x, y);
        if cell.is_empty() {
            continue;
        }
        let Some(attacker) = ctx.colonies.get(cell.colony_id) else {
            continue;
        };
        if !attacker.active {
            continue;
        }

        for dir in CARDINAL_DIRS {
            let Some((tx, ty)) = ctx.cells.neighbor(x, y, dir) else {
                continue;
            };
            let target = ctx.cells.get(tx, ty);

            if target.is_empty() {
                let p = colonization_probability(ctx, attacker, tx, ty, dir);
                if rng.chance(p as f64) {
                    proposals.push((tx, ty, attacker.id));
                }
            } else if target.colony_id != cell.colony_id {
                let Some(defender) = ctx.colonies.get(target.colony_id) else {
                    continue;
                };
                if !defender.active || attacker_abstains(attacker) {
                    continue;
                }
                let p = takeover_probability(ctx, attacker, defender, x, y, tx, ty, dir);
                let step = LEARNING_STEP * attacker.genome.learning_rate;
                if rng.chance(p as f64) {
                    proposals.push((tx, ty, attacker.id));
                    history.push((attacker.id, dir, step));
                } else {
                    history.push((attacker.id, dir, -step));
                }
            }
        }
    }

    if !proposals.is_empty() || !history.is_empty() {
        let mut scratch = scratch.lock().unwrap();
        for (x, y, id) in proposals {
            scratch.pending.push(x, y, id);
        }
        scratch.history_deltas.extend(history);
    }
}

/// Probability that `attacker` claims the empty cell at `(tx, ty)`.
fn colonization_probability(ctx: &TaskContext, attacker: &Colony, tx: u32, ty: u32, dir: usize) -> f32 {
    let genome = &attacker.genome;

    let mut p = genome.spread_rate
        * genome.metabolism
        * environment_modifier(ctx, attacker, tx, ty)
        * genome.direction_weight(dir)
        * (1.0 + attacker.success_history[dir % 8] * 0.3)
        * ctx.spread_boost;

    // Expanding into contested ground is riskier for timid colonies.
    if enemy_adjacent(&ctx.cells, tx, ty, attacker.id) {
        p *= 0.3 + genome.aggression * 0.4;
    }
    // Dormant colonies have shut their metabolism down.
    if attacker.is_dormant() {
        p *= 0.1;
    }

    p.clamp(0.0, 1.0)
}

/// Combined environmental response at the target cell, clamped to
/// `[ENV_MODIFIER_MIN, ENV_MODIFIER_MAX]`.
///
/// Chemotaxis, toxin avoidance, and edge affinity multiply; quorum sensing
/// then subtracts a crowding penalty when local density exceeds the
/// genome's threshold.
fn environment_modifier(ctx: &TaskContext, colony: &Colony, tx: u32, ty: u32) -> f32 {
    let genome = &colony.genome;
    let nutrient = ctx.nutrients.get(tx, ty);
    let toxin = ctx.toxins.get(tx, ty);

    let chemotaxis = 1.0 + genome.nutrient_sensitivity * (nutrient - 0.5);
    let avoidance = 1.0 - genome.toxin_sensitivity * toxin;
    let edge = 1.0 + genome.edge_affinity * (edge_factor(&ctx.cells, tx, ty) - 0.5);

    let mut modifier = chemotaxis * avoidance * edge;

    let density = local_density(&ctx.cells, tx, ty);
    if density > genome.quorum_threshold {
        modifier -= (density - genome.quorum_threshold) * (1.0 - genome.density_tolerance);
    }

    modifier.clamp(ENV_MODIFIER_MIN, ENV_MODIFIER_MAX)
}

/// Probability that `attacker` takes the defended cell at `(tx, ty)` from
/// its cell at `(x, y)`.
#[allow(clippy::too_many_arguments)]
fn takeover_probability(
    ctx: &TaskContext,
    attacker: &Colony,
    defender: &Colony,
    x: u32,
    y: u32,
    tx: u32,
    ty: u32,
    dir: usize,
) -> f32 {
    let ag = &attacker.genome;
    let dg = &defender.genome;

    let own_nutrient = ctx.nutrients.get(x, y);
    let own_toxin = ctx.toxins.get(x, y);
    let target_nutrient = ctx.nutrients.get(tx, ty);

    let flanking = 1.0 + friendly_neighbors(&ctx.cells, tx, ty, attacker.id) as f32 * 0.15;
    let dir_pref = 0.5 + ag.direction_weight(dir);

    let mut attack = ag.aggression * 1.2 * flanking * dir_pref * (1.0 + own_nutrient * 0.5 - 0.4)
        - own_toxin * (1.0 - ag.toxin_resistance)
        + ag.toxin_production * 0.4
        + attacker.success_history[dir % 8] * 0.4;

    // Size ratio: overwhelming numbers help, being dwarfed hurts.
    if defender.cell_count > 0 {
        let ratio = attacker.cell_count as f32 / defender.cell_count as f32;
        if ratio > 2.0 {
            attack *= 1.25;
        } else if ratio < 0.5 {
            attack *= 0.8;
        }
    }
    attack = attack.max(0.0);

    let formation =
        1.0 + dg.defense_priority * friendly_neighbors(&ctx.cells, tx, ty, defender.id) as f32 * 0.2;
    let defense = dg.resilience * formation * (1.0 + defender.biofilm_strength * 0.3)
        + dg.toxin_resistance * 0.3
        + target_nutrient * 0.5;

    let p_attack = attack / (attack + defense + 1e-6);
    (p_attack * 1.5).min(1.0)
}

/// Attackers sit combat out when dormant, or when stressed colonies that
/// prioritize defense turtle up instead of raiding.
fn attacker_abstains(attacker: &Colony) -> bool {
    attacker.is_dormant()
        || (attacker.stress_level > 0.7 && attacker.genome.defense_priority > 0.5)
}

/// Fraction of the target's 4-neighborhood that is empty. Out-of-bounds
/// neighbors count as empty: the grid edge is open frontier.
fn edge_factor(cells: &SyncGrid<Cell>, x: u32, y: u32) -> f32 {
    let mut empty = 0;
    for dir in CARDINAL_DIRS {
        match cells.neighbor(x, y, dir) {
            Some((nx, ny)) => {
                if cells.get(nx, ny).is_empty() {
                    empty += 1;
                }
            }
            None => empty += 1,
        }
    }
    empty as f32 / 4.0
}

/// Fraction of the target's 8-neighborhood that is owned by anyone.
fn local_density(cells: &SyncGrid<Cell>, x: u32, y: u32) -> f32 {
    let mut occupied = 0;
    for dir in 0..NEIGHBOR_OFFSETS.len() {
        if let Some((nx, ny)) = cells.neighbor(x, y, dir) {
            if !cells.get(nx, ny).is_empty() {
                occupied += 1;
            }
        }
    }
    occupied as f32 / NEIGHBOR_OFFSETS.len() as f32
}

/// Number of cells in the target's 8-neighborhood owned by `colony_id`.
fn friendly_neighbors(cells: &SyncGrid<Cell>, x: u32, y: u32, colony_id: u32) -> u32 {
    let mut count = 0;
    for dir in 0..NEIGHBOR_OFFSETS.len() {
        if let Some((nx, ny)) = cells.neighbor(x, y, dir) {
            if cells.get(nx, ny).colony_id == colony_id {
                count += 1;
            }
        }
    }
    count
}

/// True when any cardinal neighbor of the target is owned by a colony other
/// than `colony_id`.
fn enemy_adjacent(cells: &SyncGrid<Cell>, x: u32, y: u32, colony_id: u32) -> bool {
    for dir in CARDINAL_DIRS {
        if let Some((nx, ny)) = cells.neighbor(x, y, dir) {
            let owner = cells.get(nx, ny).colony_id;
            if owner != EMPTY && owner != colony_id {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::genome::Genome;
    use crate::parallel::partition_grid;
    use crate::rng::SimRng;
    use crate::world::colony::ColonyState;
    use crate::world::World;

    fn context_for(world: &World) -> TaskContext {
        TaskContext {
            cells: Arc::clone(&world.cells),
            nutrients: Arc::clone(&world.nutrients),
            toxins: Arc::clone(&world.toxins),
            colonies: Arc::new(world.snapshot_colonies()),
            spread_boost: 5.5,
        }
    }

    fn eager_genome(rng: &mut SimRng) -> Genome {
        let mut genome = Genome::random(rng);
        genome.spread_rate = 1.0;
        genome.metabolism = 1.0;
        genome.spread_weights = [1.0; 8];
        genome.nutrient_sensitivity = 0.0;
        genome.toxin_sensitivity = 0.0;
        genome.edge_affinity = 0.0;
        genome.quorum_threshold = 1.0;
        genome
    }

    #[test]
    fn test_eager_colony_proposes_all_neighbors() {
        let mut world = World::new(8, 8, 10);
        let mut rng = SimRng::seeded(10);
        let genome = eager_genome(&mut rng);
        let id = world.spawn_colony(None, genome, 0, &mut rng);
        world.assign_cell(4, 4, id);

        let ctx = context_for(&world);
        let regions = partition_grid(8, 8, 1, 1);
        let scratch = Mutex::new(RegionScratch::default());
        run_region(&ctx, regions[0], &scratch, 99);

        // Probability is clamped to 1 for this genome, so all four cardinal
        // neighbors must be proposed.
        let scratch = scratch.lock().unwrap();
        assert_eq!(scratch.pending.len(), 4);
        let targets: Vec<(u32, u32)> = scratch
            .pending
            .writes()
            .iter()
            .map(|w| (w.x, w.y))
            .collect();
        assert!(targets.contains(&(4, 3)));
        assert!(targets.contains(&(5, 4)));
        assert!(targets.contains(&(4, 5)));
        assert!(targets.contains(&(3, 4)));
    }

    #[test]
    fn test_inert_colony_proposes_nothing() {
        let mut world = World::new(8, 8, 11);
        let mut rng = SimRng::seeded(11);
        let mut genome = Genome::random(&mut rng);
        genome.spread_rate = 0.0;
        let id = world.spawn_colony(None, genome, 0, &mut rng);
        world.assign_cell(4, 4, id);

        let ctx = context_for(&world);
        let regions = partition_grid(8, 8, 1, 1);
        let scratch = Mutex::new(RegionScratch::default());
        for seed in 0..50 {
            run_region(&ctx, regions[0], &scratch, seed);
        }
        assert!(scratch.lock().unwrap().pending.is_empty());
    }

    #[test]
    fn test_proposals_confined_to_own_region() {
        let mut world = World::new(8, 8, 12);
        let mut rng = SimRng::seeded(12);
        let genome = eager_genome(&mut rng);
        let id = world.spawn_colony(None, genome, 0, &mut rng);
        // The colony fills the left region exactly (columns 0..4).
        for y in 0..8 {
            for x in 0..4 {
                world.assign_cell(x, y, id);
            }
        }

        let ctx = context_for(&world);
        let regions = partition_grid(8, 8, 2, 1);
        let scratch_left = Mutex::new(RegionScratch::default());
        let scratch_right = Mutex::new(RegionScratch::default());
        run_region(&ctx, regions[0], &scratch_left, 5);
        run_region(&ctx, regions[1], &scratch_right, 5);

        // The right region holds no colony cells, so it proposes nothing
        // even though the frontier sits on its boundary.
        assert!(scratch_right.lock().unwrap().pending.is_empty());
        // Frontier cells in the left region propose across the boundary;
        // writes are keyed by origin region, not target position.
        let left = scratch_left.lock().unwrap();
        assert!(left.pending.writes().iter().any(|w| w.x == 4));
    }

    #[test]
    fn test_dormant_attacker_abstains_from_combat() {
        let mut world = World::new(8, 8, 13);
        let mut rng = SimRng::seeded(13);
        let mut genome = eager_genome(&mut rng);
        genome.aggression = 1.0;
        let a = world.spawn_colony(None, genome.clone(), 0, &mut rng);
        let b = world.spawn_colony(None, genome, 0, &mut rng);
        world.assign_cell(4, 4, a);
        world.assign_cell(5, 4, b);
        world.colony_mut(a).unwrap().state = ColonyState::Dormant;
        world.colony_mut(b).unwrap().state = ColonyState::Dormant;

        let ctx = context_for(&world);
        let regions = partition_grid(8, 8, 1, 1);
        let scratch = Mutex::new(RegionScratch::default());
        for seed in 0..50 {
            run_region(&ctx, regions[0], &scratch, seed);
        }
        // Neither dormant colony ever records a takeover of the other.
        let scratch = scratch.lock().unwrap();
        assert!(!scratch
            .pending
            .writes()
            .iter()
            .any(|w| (w.x, w.y) == (4, 4) || (w.x, w.y) == (5, 4)));
        assert!(scratch.history_deltas.is_empty());
    }

    #[test]
    fn test_combat_records_history_both_ways() {
        let mut world = World::new(8, 8, 14);
        let mut rng = SimRng::seeded(14);
        let mut genome = eager_genome(&mut rng);
        genome.aggression = 1.0;
        genome.learning_rate = 1.0;
        let a = world.spawn_colony(None, genome.clone(), 0, &mut rng);
        let b = world.spawn_colony(None, genome, 0, &mut rng);
        world.assign_cell(4, 4, a);
        world.assign_cell(5, 4, b);

        let ctx = context_for(&world);
        let regions = partition_grid(8, 8, 1, 1);
        let scratch = Mutex::new(RegionScratch::default());
        for seed in 0..20 {
            run_region(&ctx, regions[0], &scratch, seed);
        }
        // Every combat roll leaves a history delta, win or lose.
        let scratch = scratch.lock().unwrap();
        assert!(!scratch.history_deltas.is_empty());
        for (id, dir, delta) in &scratch.history_deltas {
            assert!(*id == a || *id == b);
            assert!(*dir == 2 || *dir == 6); // east from a, west from b
            assert!((delta.abs() - LEARNING_STEP).abs() < 1e-6);
        }
    }

    #[test]
    fn test_env_modifier_clamped() {
        let mut world = World::new(8, 8, 15);
        let mut rng = SimRng::seeded(15);
        let mut genome = Genome::random(&mut rng);
        genome.nutrient_sensitivity = 1.0;
        genome.toxin_sensitivity = 1.0;
        let id = world.spawn_colony(None, genome, 0, &mut rng);
        world.assign_cell(4, 4, id);
        world.toxins.set(5, 4, 1.0);
        world.nutrients.set(5, 4, 0.0);

        let ctx = context_for(&world);
        let colony = ctx.colonies.get(id).unwrap().clone();
        let m = environment_modifier(&ctx, &colony, 5, 4);
        assert!((ENV_MODIFIER_MIN..=ENV_MODIFIER_MAX).contains(&m));
    }
}
