//! Shaper: adaptive reward shaping for an RL agent playing a tile-based RPG.
//!
//! Combines a coarse, classifier-assisted objective lifecycle with a fine,
//! purely geometric proximity signal into one bounded multiplier per step,
//! keeping every environment's state strictly separate.

pub mod config;
pub mod env;
pub mod model;
pub mod shaping;
