//! Level streaming: budgeted incremental activation, deactivation and
//! deferred reclamation of streamed sub-levels.
//!
//! # Invariants
//! - At most one level is mid-activation at any time, across the whole scheduler.
//! - Activation steps run in a fixed order, never skipping one.
//! - Deactivation is never time-sliced and never interleaves with an activation.
//! - Load completions arrive as channel messages and are only applied on the tick thread.
//! - Content is never freed while it is still pending visibility.

mod activation;
mod budget;
mod deactivation;
mod descriptor;
mod gc;
mod loader;
mod notify;
mod physics;
mod policy;
mod scheduler;

pub use activation::{
    ActivationContext, ActivationObserver, ActivationProgress, ActivationSlot, AdvanceReport, IdleProof, advance,
};
pub use budget::{BudgetTracker, ConfigError, FrameTimer, StreamConfig, StreamStats, TickBudget};
pub use deactivation::{DeactivationContext, DeactivationReport, deactivate};
pub use descriptor::LevelDescriptor;
pub use gc::{CollectionStats, DanglingRef, GarbageCollector, GcDeferralQueue, ReferenceSweeper};
pub use loader::{AsyncContentLoader, CatalogLoader, DirectoryLoader, LoadCompletion, LoadError};
pub use notify::{NetNotice, NetworkNotifier, NullNotifier, RecordingNotifier};
pub use physics::{BodyRegistry, PhysicsHost};
pub use policy::{AlwaysLoaded, DistancePolicy, PersistentPolicy, ScriptedPolicy, StreamingPolicy, from_spec};
pub use scheduler::{FlushMode, LevelStreamingScheduler, StreamError, StreamingHost};

pub fn crate_info() -> &'static str {
    concat!("levelflow-stream v", env!("CARGO_PKG_VERSION"))
}
