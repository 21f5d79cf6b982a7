//! petri - grid-based bacterial colony ecology simulation.
//!
//! This library simulates an ecology of bacterial colonies competing over a
//! 2D cell grid and streams the evolving world state to terminal clients
//! over a small binary protocol.
//!
//! # Features
//!
//! - Genome-driven colony behavior: growth, chemotaxis, combat, biofilms
//! - Parallel tick pipeline over a fixed worker pool with region tiling
//! - Connected-component division, kin recombination, and speciation
//! - Little-endian framed wire protocol with snapshot broadcasting
//!
//! # Example
//!
//! ```ignore
//! use petri::config::SimConfig;
//! use petri::server::BroadcastServer;
//! use petri::sim::Simulation;
//!
//! let config = SimConfig::default();
//! let sim = Simulation::new(config)?;
//! let mut server = BroadcastServer::bind("0.0.0.0:4433".parse()?, sim)?;
//! server.run()?;
//! ```

pub mod config;
pub mod genome;
pub mod parallel;
pub mod protocol;
pub mod rng;
pub mod server;
pub mod sim;
pub mod world;

pub use config::SimConfig;
pub use genome::Genome;
pub use rng::SimRng;
pub use server::BroadcastServer;
pub use sim::Simulation;
pub use world::World;
