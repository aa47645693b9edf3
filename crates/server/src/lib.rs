//! Headless server core for the minefield world engine: the on-disk chunk
//! store plus the wiring that keeps a world alive and saved. Transport,
//! identity, and scoring attach from the outside.

pub mod persistence;
