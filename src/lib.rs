//! Core of a three-dimensional semi-implicit electromagnetic
//! particle-in-cell simulation.
//!
//! The cycle advanced by this crate is
//!
//! 1. gather the ten velocity moments of every species onto mesh nodes,
//! 2. exchange moment ghost layers (additively) with MPI neighbours,
//! 3. build the implicit "hat" sources from the moments,
//! 4. solve the implicit Maxwell system with GMRES (optionally preceded
//!    by conjugate-gradient divergence cleaning),
//! 5. advance B from Faraday's law and repack the fields for the mover.
//!
//! The particle mover and problem-specific initializers are external;
//! they consume the packed field view and feed particles back through
//! [`blockcomm::BlockCommunicator`] channels.

pub mod blockcomm;
pub mod config;
pub mod field;
pub mod grid;
pub mod halo;
pub mod moments;
pub mod particle;
pub mod solver;
pub mod topology;

pub use config::{Case, Config, ConfigError};
pub use field::FieldState;
pub use grid::StaggeredGrid;
pub use halo::{Halo, LocalHalo, MpiHalo};
pub use particle::{ParticleArrays, ParticleStore, SpeciesParticle};
pub use solver::{Outcome, SolveReport};
pub use topology::{CartTopology, Face, Topology};
