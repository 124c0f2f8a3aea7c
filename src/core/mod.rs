//! Core primitives shared by the game and network layers.

pub mod rng;

pub use rng::DeterministicRng;
