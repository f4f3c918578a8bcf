//! Seamless travel: moving the live simulation to another world through a
//! neutral transition world while peers stay connected.
//!
//! # Invariants
//! - One travel at a time per [`WorldContext`]; a second request to the same
//!   map replaces the URL, a request elsewhere cancels the first.
//! - A commit runs to completion within one tick. The old world is condemned
//!   and collected before the new one begins play.
//! - A failed load abandons the whole travel and leaves the previous world live.
//! - A package version mismatch closes only the peer that disagrees.

mod context;
mod controller;
mod hooks;
mod net;
mod url;

pub use context::WorldContext;
pub use controller::{TransitionState, TravelError, TravelEvent, TravelHost, WorldTransitionController};
pub use hooks::{RetainedActorSet, StandardHooks, TravelHooks};
pub use net::{Connection, NetSession, PackageVerdict};
pub use url::TravelUrl;

pub fn crate_info() -> &'static str {
    concat!("levelflow-travel v", env!("CARGO_PKG_VERSION"))
}
