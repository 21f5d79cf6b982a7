//! Parallelization substrate: worker pool, region tiling, pending writes.

pub mod pending;
pub mod pool;
pub mod regions;

pub use pending::{CellWrite, PendingBuffer};
pub use pool::WorkerPool;
pub use regions::{default_region_grid, partition_grid, Region};
