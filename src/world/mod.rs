//! The authoritative world model.
//!
//! A `World` owns the cell grid, the two environmental scalar fields, and
//! the colony table. The simulation pipeline is the only writer; region
//! workers read through `Arc` clones of the grids and confine their writes
//! to their own region.

pub mod colony;
pub mod grid;

use std::sync::Arc;

use ahash::AHashMap;
use log::debug;

use crate::genome::Genome;
use crate::rng::SimRng;
use crate::world::colony::{colony_name, Colony};
use crate::world::grid::{Cell, SyncGrid, CARDINAL_DIRS, EMPTY};

/// The simulated world: grid, fields, and colony table.
pub struct World {
    width: u32,
    height: u32,
    /// Cell ownership grid. Shared with region tasks during parallel phases.
    pub cells: Arc<SyncGrid<Cell>>,
    /// Nutrient field, each value in `[0,1]`.
    pub nutrients: Arc<SyncGrid<f32>>,
    /// Toxin field, each value in `[0,1]`.
    pub toxins: Arc<SyncGrid<f32>>,
    colonies: Vec<Colony>,
    slot_by_id: AHashMap<u32, usize>,
    next_id: u32,
    seed: u64,
    /// Completed pipeline passes since creation.
    pub tick: u64,
}

impl World {
    /// Create an empty world.
    ///
    /// Nutrients start with mild seeded variation so chemotaxis has a
    /// gradient to read from the first tick; toxins start at zero.
    pub fn new(width: u32, height: u32, seed: u64) -> Self {
        let nutrients = SyncGrid::new(width, height, 0.0f32);
        let mut field_rng = SimRng::seeded(seed ^ 0x6e75_7472);
        for y in 0..height {
            for x in 0..width {
                nutrients.set(x, y, field_rng.range_f32(0.35, 0.65));
            }
        }

        World {
            width,
            height,
            cells: Arc::new(SyncGrid::new(width, height, Cell::empty())),
            nutrients: Arc::new(nutrients),
            toxins: Arc::new(SyncGrid::new(width, height, 0.0f32)),
            colonies: Vec::new(),
            slot_by_id: AHashMap::new(),
            next_id: 1,
            seed,
            tick: 0,
        }
    }

    /// World width in cells.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// World height in cells.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Seed the world was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// All colony slots, active and inactive.
    pub fn colonies(&self) -> &[Colony] {
        &self.colonies
    }

    /// Mutable access to every colony slot.
    pub fn colonies_mut(&mut self) -> &mut [Colony] {
        &mut self.colonies
    }

    /// Look up a colony by id.
    pub fn colony(&self, id: u32) -> Option<&Colony> {
        self.slot_by_id.get(&id).map(|&slot| &self.colonies[slot])
    }

    /// Look up a colony by id, mutably.
    pub fn colony_mut(&mut self, id: u32) -> Option<&mut Colony> {
        match self.slot_by_id.get(&id) {
            Some(&slot) => Some(&mut self.colonies[slot]),
            None => None,
        }
    }

    /// Number of colonies still holding cells.
    pub fn active_colony_count(&self) -> usize {
        self.colonies.iter().filter(|c| c.active).count()
    }

    /// Allocate a new colony slot and id.
    ///
    /// When `name` is `None` a deterministic name is derived from the world
    /// seed and the new id.
    pub fn spawn_colony(
        &mut self,
        name: Option<String>,
        genome: Genome,
        parent_id: u32,
        rng: &mut SimRng,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;

        let name = name.unwrap_or_else(|| colony_name(self.seed, id));
        let colony = Colony::new(id, name, genome, parent_id, rng);
        debug!(
            "colony #{id} \"{}\" spawned (parent {parent_id})",
            colony.name
        );

        self.slot_by_id.insert(id, self.colonies.len());
        self.colonies.push(colony);
        id
    }

    /// Reassign ownership of one cell, keeping both cell counts consistent.
    ///
    /// This is the single serial-phase mutator for cell ownership. Passing
    /// `EMPTY` clears the cell.
    pub fn assign_cell(&mut self, x: u32, y: u32, new_owner: u32) {
        let cell = self.cells.get(x, y);
        if cell.colony_id == new_owner {
            return;
        }

        if cell.colony_id != EMPTY {
            if let Some(loser) = self.colony_mut(cell.colony_id) {
                loser.cell_count = loser.cell_count.saturating_sub(1);
            }
        }

        if new_owner == EMPTY {
            self.cells.update(x, y, Cell::clear);
        } else {
            self.cells.update(x, y, |c| c.claim(new_owner));
            if let Some(winner) = self.colony_mut(new_owner) {
                winner.cell_count += 1;
            }
        }
    }

    /// Seed `count` colonies at random positions, each as a small blob.
    pub fn seed_random_colonies(&mut self, count: usize, rng: &mut SimRng) {
        for _ in 0..count {
            let genome = Genome::random(rng);
            let id = self.spawn_colony(None, genome, 0, rng);

            // Find an empty starting cell; give up quietly on a packed grid.
            let mut placed = false;
            for _ in 0..50 {
                let x = rng.range_u32(0, self.width);
                let y = rng.range_u32(0, self.height);
                if self.cells.get(x, y).is_empty() {
                    self.assign_cell(x, y, id);
                    // A few adjacent cells so fresh worlds are visible.
                    for dir in CARDINAL_DIRS {
                        if let Some((nx, ny)) = self.cells.neighbor(x, y, dir) {
                            if self.cells.get(nx, ny).is_empty() && rng.chance(0.6) {
                                self.assign_cell(nx, ny, id);
                            }
                        }
                    }
                    placed = true;
                    break;
                }
            }
            if !placed {
                if let Some(colony) = self.colony_mut(id) {
                    colony.deactivate();
                }
            }
        }
    }

    /// Recompute every colony's `cell_count` from the grid.
    ///
    /// The grid is the source of truth; incremental bookkeeping elsewhere is
    /// verified here in debug builds and silently repaired in release.
    pub fn recount_cell_counts(&mut self) {
        let mut counts = vec![0u32; self.colonies.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let id = self.cells.get(x, y).colony_id;
                if id != EMPTY {
                    if let Some(&slot) = self.slot_by_id.get(&id) {
                        counts[slot] += 1;
                    }
                }
            }
        }
        for (slot, colony) in self.colonies.iter_mut().enumerate() {
            debug_assert_eq!(
                colony.cell_count, counts[slot],
                "cell count drift for colony #{}",
                colony.id
            );
            colony.cell_count = counts[slot];
        }
    }

    /// Recompute the cached `is_border` flag for every owned cell.
    pub fn refresh_borders(&self) {
        for y in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells.get(x, y);
                if cell.is_empty() {
                    continue;
                }
                let mut border = false;
                for dir in CARDINAL_DIRS {
                    match self.cells.neighbor(x, y, dir) {
                        Some((nx, ny)) => {
                            if self.cells.get(nx, ny).colony_id != cell.colony_id {
                                border = true;
                                break;
                            }
                        }
                        // Grid edges count as borders.
                        None => {
                            border = true;
                            break;
                        }
                    }
                }
                if border != cell.is_border {
                    self.cells.update(x, y, |c| c.is_border = border);
                }
            }
        }
    }

    /// Centroid of every colony slot, or `None` for slots with no cells.
    ///
    /// Derived from the grid in one scan; centroids are never stored.
    pub fn centroids(&self) -> Vec<Option<(f32, f32)>> {
        let mut sums = vec![(0.0f64, 0.0f64, 0u64); self.colonies.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let id = self.cells.get(x, y).colony_id;
                if id != EMPTY {
                    if let Some(&slot) = self.slot_by_id.get(&id) {
                        sums[slot].0 += x as f64;
                        sums[slot].1 += y as f64;
                        sums[slot].2 += 1;
                    }
                }
            }
        }
        sums.into_iter()
            .map(|(sx, sy, n)| {
                if n == 0 {
                    None
                } else {
                    Some(((sx / n as f64) as f32, (sy / n as f64) as f32))
                }
            })
            .collect()
    }

    /// Centroid of one colony, if it owns any cells.
    pub fn centroid(&self, id: u32) -> Option<(f32, f32)> {
        let slot = *self.slot_by_id.get(&id)?;
        self.centroids().get(slot).copied().flatten()
    }

    /// Fraction of the grid no colony owns.
    pub fn empty_ratio(&self) -> f32 {
        let owned: u64 = self
            .colonies
            .iter()
            .filter(|c| c.active)
            .map(|c| c.cell_count as u64)
            .sum();
        let total = self.cells.len() as u64;
        if total == 0 {
            return 0.0;
        }
        1.0 - owned as f32 / total as f32
    }

    /// Value copy of the colony table for read access from worker tasks.
    pub fn snapshot_colonies(&self) -> ColonySnapshot {
        ColonySnapshot {
            colonies: self.colonies.clone(),
            slot_by_id: self.slot_by_id.clone(),
        }
    }
}

/// Immutable value copy of the colony table.
///
/// Region tasks hold this behind an `Arc` while the world's own table stays
/// untouched behind the barrier.
pub struct ColonySnapshot {
    colonies: Vec<Colony>,
    slot_by_id: AHashMap<u32, usize>,
}

impl ColonySnapshot {
    /// Look up a colony by id.
    pub fn get(&self, id: u32) -> Option<&Colony> {
        self.slot_by_id.get(&id).map(|&slot| &self.colonies[slot])
    }

    /// All colony slots in the snapshot.
    pub fn colonies(&self) -> &[Colony] {
        &self.colonies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_world() -> (World, SimRng) {
        (World::new(16, 16, 42), SimRng::seeded(42))
    }

    #[test]
    fn test_new_world_is_empty() {
        let (world, _) = small_world();
        assert_eq!(world.active_colony_count(), 0);
        assert_eq!(world.tick, 0);
        assert!((world.empty_ratio() - 1.0).abs() < f32::EPSILON);
        for y in 0..16 {
            for x in 0..16 {
                assert!(world.cells.get(x, y).is_empty());
                let n = world.nutrients.get(x, y);
                assert!((0.35..0.65).contains(&n));
                assert_eq!(world.toxins.get(x, y), 0.0);
            }
        }
    }

    #[test]
    fn test_spawn_assigns_monotonic_ids() {
        let (mut world, mut rng) = small_world();
        let a = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        let b = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(world.colony(a).is_some());
        assert!(world.colony(b).is_some());
        assert!(world.colony(99).is_none());
    }

    #[test]
    fn test_assign_cell_keeps_counts() {
        let (mut world, mut rng) = small_world();
        let a = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        let b = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);

        world.assign_cell(3, 3, a);
        world.assign_cell(4, 3, a);
        assert_eq!(world.colony(a).unwrap().cell_count, 2);

        // Takeover moves the count across colonies.
        world.assign_cell(3, 3, b);
        assert_eq!(world.colony(a).unwrap().cell_count, 1);
        assert_eq!(world.colony(b).unwrap().cell_count, 1);
        assert_eq!(world.cells.get(3, 3).colony_id, b);
        assert_eq!(world.cells.get(3, 3).age, 0);

        // Clearing releases the count.
        world.assign_cell(3, 3, EMPTY);
        assert_eq!(world.colony(b).unwrap().cell_count, 0);
        assert!(world.cells.get(3, 3).is_empty());
    }

    #[test]
    fn test_seed_random_colonies() {
        let (mut world, mut rng) = small_world();
        world.seed_random_colonies(5, &mut rng);
        assert_eq!(world.colonies().len(), 5);
        for colony in world.colonies() {
            if colony.active {
                assert!(colony.cell_count >= 1);
            }
        }
        // Counts must match the grid exactly.
        world.recount_cell_counts();
    }

    #[test]
    fn test_recount_matches_grid() {
        let (mut world, mut rng) = small_world();
        let id = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        world.assign_cell(0, 0, id);
        world.assign_cell(1, 0, id);
        world.assign_cell(2, 0, id);
        world.recount_cell_counts();
        assert_eq!(world.colony(id).unwrap().cell_count, 3);
    }

    #[test]
    fn test_centroid_derived_from_cells() {
        let (mut world, mut rng) = small_world();
        let id = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        world.assign_cell(2, 4, id);
        world.assign_cell(4, 4, id);
        let (cx, cy) = world.centroid(id).unwrap();
        assert!((cx - 3.0).abs() < 1e-5);
        assert!((cy - 4.0).abs() < 1e-5);
        assert_eq!(world.centroid(999), None);
    }

    #[test]
    fn test_refresh_borders() {
        let (mut world, mut rng) = small_world();
        let id = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        // 3×3 block: center is interior, ring is border.
        for y in 4..7 {
            for x in 4..7 {
                world.assign_cell(x, y, id);
            }
        }
        world.refresh_borders();
        assert!(!world.cells.get(5, 5).is_border);
        assert!(world.cells.get(4, 4).is_border);
        assert!(world.cells.get(6, 5).is_border);
    }

    #[test]
    fn test_empty_ratio() {
        let (mut world, mut rng) = small_world();
        let id = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        for x in 0..16 {
            world.assign_cell(x, 0, id);
        }
        let expected = 1.0 - 16.0 / 256.0;
        assert!((world.empty_ratio() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_snapshot_is_a_value_copy() {
        let (mut world, mut rng) = small_world();
        let id = world.spawn_colony(None, Genome::random(&mut rng), 0, &mut rng);
        let snapshot = world.snapshot_colonies();

        world.colony_mut(id).unwrap().add_stress(0.5);
        // The snapshot still sees the pre-mutation state.
        assert_eq!(snapshot.get(id).unwrap().stress_level, 0.0);
    }
}
