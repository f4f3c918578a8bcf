//! World Kernel: authoritative world state, level content and the actor arena.
//!
//! # Invariants
//! - Actors are owned by exactly one level; the world references them by id only.
//! - Cross-cutting indices (controllers, pawns) are keyed registries, never
//!   pointers threaded through actors.
//! - All state mutations that matter for streaming and travel are logged as
//!   [`WorldEvent`]s.

pub mod actor;
pub mod crossref;
pub mod level;
pub mod package;
pub mod world;

pub use actor::{Actor, ActorKind, ActorRef, ActorState, Role};
pub use crossref::{CrossRefReport, DEFAULT_TABLE_CAP};
pub use level::{ActivationStep, LevelContent, Sequence};
pub use package::{PackageContent, PackageKind, PolicySpec, StreamingLevelInfo};
pub use world::{NetMode, RegistryEntry, RootSequence, World, WorldEvent};

pub fn crate_info() -> &'static str {
    concat!("levelflow-kernel v", env!("CARGO_PKG_VERSION"))
}
