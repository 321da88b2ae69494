//! Game-state collaborator interface and a scripted stand-in emulator.
//!
//! The shaping engine only ever sees [`RawState`] snapshots. Anything that can
//! produce them step by step implements [`GameEnvironment`]; [`ScriptedGame`]
//! is a seeded mock used by the simulator and the tests.

pub mod scripted;
pub mod traits;

pub use scripted::ScriptedGame;
pub use traits::{GameEnvironment, GameStep, PartySlot, RawState};
