use levelflow_common::{EntityId, PackageName};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::Actor;

/// Position of a level in its incremental activation.
///
/// Steps only ever move forward by one. A level that has been deactivated is
/// reset to `NotStarted` before it can be activated again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivationStep {
    #[default]
    NotStarted,
    ActorsRepositioned,
    ComponentsAttached,
    PhysicsBspBuilt,
    PhysicsActorsInitialized,
    ActorsInitialized,
    BeginPlayRouted,
    CrossLevelRefsFixed,
    ScriptsBegun,
    Sorted,
    Complete,
}

impl ActivationStep {
    /// Every step in execution order, `NotStarted` first.
    pub const ORDER: [ActivationStep; 11] = [
        Self::NotStarted,
        Self::ActorsRepositioned,
        Self::ComponentsAttached,
        Self::PhysicsBspBuilt,
        Self::PhysicsActorsInitialized,
        Self::ActorsInitialized,
        Self::BeginPlayRouted,
        Self::CrossLevelRefsFixed,
        Self::ScriptsBegun,
        Self::Sorted,
        Self::Complete,
    ];

    /// The step that follows this one. `Complete` is terminal.
    pub fn next(self) -> Option<Self> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::ActorsRepositioned => "moving actors",
            Self::ComponentsAttached => "updating components",
            Self::PhysicsBspBuilt => "initializing level bsp physics mesh",
            Self::PhysicsActorsInitialized => "initializing actor physics",
            Self::ActorsInitialized => "initializing actors",
            Self::BeginPlayRouted => "routing BeginPlay on actors",
            Self::CrossLevelRefsFixed => "fixing up cross-level references",
            Self::ScriptsBegun => "routing BeginPlay on sequences",
            Self::Sorted => "sorting actor list",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for ActivationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A scripted sequence owned by a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    /// Name of the root sequence this one is nested under while its level is active.
    #[serde(skip)]
    pub parent: Option<String>,
    #[serde(skip)]
    pub begun: bool,
}

impl Sequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            begun: false,
        }
    }
}

/// In-memory content of a loaded level (the level's actor arena).
///
/// Activation state lives here but is only ever mutated by the streaming
/// crate's step functions.
#[derive(Debug, Clone)]
pub struct LevelContent {
    package: PackageName,
    actors: Vec<Actor>,
    sequences: Vec<Sequence>,
    step: ActivationStep,
    steps_taken: u64,
    cursor: usize,
    visibility_request_pending: bool,
    unload_request_pending: bool,
    package_dirty: bool,
    bsp_collision: bool,
    first_net_relevant: usize,
    first_dynamic: usize,
    condemned: bool,
}

impl LevelContent {
    pub fn new(package: impl Into<PackageName>, actors: Vec<Actor>) -> Self {
        Self {
            package: package.into(),
            actors,
            sequences: Vec::new(),
            step: ActivationStep::NotStarted,
            steps_taken: 0,
            cursor: 0,
            visibility_request_pending: false,
            unload_request_pending: false,
            package_dirty: false,
            bsp_collision: false,
            first_net_relevant: 0,
            first_dynamic: 0,
            condemned: false,
        }
    }

    pub fn with_sequences(mut self, sequences: Vec<Sequence>) -> Self {
        self.sequences = sequences;
        self
    }

    pub fn package(&self) -> &PackageName {
        &self.package
    }

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn actors_mut(&mut self) -> &mut [Actor] {
        &mut self.actors
    }

    pub fn actor(&self, id: EntityId) -> Option<&Actor> {
        self.actors.iter().find(|a| a.id == id)
    }

    pub fn actor_mut(&mut self, id: EntityId) -> Option<&mut Actor> {
        self.actors.iter_mut().find(|a| a.id == id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.actor(id).is_some()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn push_actor(&mut self, actor: Actor) {
        self.actors.push(actor);
    }

    /// Remove and return every actor matching `pred`, preserving the order of the rest.
    pub fn drain_actors_where(&mut self, mut pred: impl FnMut(&Actor) -> bool) -> Vec<Actor> {
        let (taken, kept): (Vec<Actor>, Vec<Actor>) =
            std::mem::take(&mut self.actors).into_iter().partition(|a| pred(a));
        self.actors = kept;
        taken
    }

    pub fn replace_actors(&mut self, actors: Vec<Actor>) {
        self.actors = actors;
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn sequences_mut(&mut self) -> &mut [Sequence] {
        &mut self.sequences
    }

    // --- activation bookkeeping ---

    pub fn step(&self) -> ActivationStep {
        self.step
    }

    /// Total number of step transitions this content has made over its lifetime.
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Move to the next activation step. Returns the new step.
    pub fn advance_step(&mut self) -> ActivationStep {
        if let Some(next) = self.step.next() {
            self.step = next;
            self.steps_taken += 1;
            self.cursor = 0;
        }
        self.step
    }

    /// Return to `NotStarted` so the level can be activated again later.
    pub fn reset_activation(&mut self) {
        self.step = ActivationStep::NotStarted;
        self.cursor = 0;
        self.visibility_request_pending = false;
    }

    /// Sub-batch position inside the current incremental step.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn visibility_request_pending(&self) -> bool {
        self.visibility_request_pending
    }

    pub fn set_visibility_request_pending(&mut self, pending: bool) {
        self.visibility_request_pending = pending;
    }

    pub fn unload_request_pending(&self) -> bool {
        self.unload_request_pending
    }

    pub fn set_unload_request_pending(&mut self, pending: bool) {
        self.unload_request_pending = pending;
    }

    pub fn is_package_dirty(&self) -> bool {
        self.package_dirty
    }

    pub fn mark_package_dirty(&mut self) {
        self.package_dirty = true;
    }

    pub fn has_bsp_collision(&self) -> bool {
        self.bsp_collision
    }

    pub fn set_bsp_collision(&mut self, built: bool) {
        self.bsp_collision = built;
    }

    pub fn is_condemned(&self) -> bool {
        self.condemned
    }

    /// Mark the level, its actors and its sequences as pending kill.
    pub fn condemn(&mut self) {
        self.condemned = true;
        for actor in &mut self.actors {
            actor.state.pending_kill = true;
            actor.state.components_attached = false;
        }
    }

    /// Index of the first static, net relevant actor after sorting.
    pub fn first_net_relevant(&self) -> usize {
        self.first_net_relevant
    }

    /// Index of the first dynamic actor after sorting.
    pub fn first_dynamic(&self) -> usize {
        self.first_dynamic
    }

    /// Stable-partition actors into static non-relevant, static relevant, dynamic.
    /// Actors already pending kill are dropped from the list.
    pub fn sort_actor_list(&mut self) {
        let actors = std::mem::take(&mut self.actors);
        let (live, _dead): (Vec<Actor>, Vec<Actor>) =
            actors.into_iter().partition(|a| !a.state.pending_kill);
        let (statics, dynamic): (Vec<Actor>, Vec<Actor>) =
            live.into_iter().partition(|a| a.is_static);
        let (relevant, plain): (Vec<Actor>, Vec<Actor>) =
            statics.into_iter().partition(|a| a.always_relevant);

        self.first_net_relevant = plain.len();
        self.first_dynamic = plain.len() + relevant.len();
        self.actors = plain;
        self.actors.extend(relevant);
        self.actors.extend(dynamic);
    }
}
