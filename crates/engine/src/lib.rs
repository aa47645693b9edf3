//! World engine for a persistent, multiplayer, infinite minesweeper grid.
//!
//! The plane is divided into fixed-size chunks that materialize on demand:
//! generated procedurally on first touch, or reconstructed from a persisted
//! snapshot on later visits. [`world::World`] owns the chunk cache and runs
//! every mutation; [`listener`] fans per-chunk updates out to whoever is
//! watching; [`game::Game`] bundles both behind the surface a transport
//! layer talks to.

pub mod game;
pub mod listener;
pub mod world;
