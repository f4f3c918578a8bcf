use levelflow_common::{EntityId, PackageName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::actor::{Actor, ActorKind};
use crate::level::LevelContent;
use crate::package::{PackageContent, StreamingLevelInfo};

/// An event record produced by every lifecycle mutation of the world.
///
/// Streaming and travel tests assert against this log; hosts can drain it to
/// drive UI or telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// A level joined the active-levels collection.
    LevelAdded { package: PackageName },
    /// A level left the active-levels collection.
    LevelRemoved { package: PackageName },
    /// BeginPlay was routed on the world's persistent level.
    BeganPlay { world: PackageName },
    /// Actors carried over from a previous world during travel.
    ActorsAdopted { from: PackageName, count: usize },
    /// Simulation advanced one tick.
    Stepped { tick: u64 },
}

/// Network mode of the simulation hosting this world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetMode {
    #[default]
    Standalone,
    DedicatedServer,
    ListenServer,
    Client,
}

/// An entry in one of the world's typed registries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Level the actor lives in.
    pub level: PackageName,
    /// Set on pawns whose floor may have been streamed out from under them.
    pub force_floor_check: bool,
}

/// The persistent root sequence that level sequences nest under while active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootSequence {
    pub name: String,
    /// `(level, sequence)` pairs currently nested under the root.
    pub nested: Vec<(PackageName, String)>,
}

impl RootSequence {
    pub fn attach(&mut self, level: &PackageName, sequence: &str) {
        let entry = (level.clone(), sequence.to_string());
        if !self.nested.contains(&entry) {
            self.nested.push(entry);
        }
    }

    pub fn detach_level(&mut self, level: &PackageName) -> usize {
        let before = self.nested.len();
        self.nested.retain(|(l, _)| l != level);
        before - self.nested.len()
    }
}

/// The live simulation world.
///
/// Owns its persistent level outright; streamed levels are owned by their
/// descriptors and only referenced here by name in the active-levels
/// collection. Controllers and pawns are tracked in keyed registries so
/// condemning a level never leaves dangling links.
#[derive(Debug, Clone)]
pub struct World {
    name: PackageName,
    persistent: LevelContent,
    levels: Vec<PackageName>,
    streaming_levels: Vec<StreamingLevelInfo>,
    controllers: BTreeMap<EntityId, RegistryEntry>,
    pawns: BTreeMap<EntityId, RegistryEntry>,
    root_sequence: RootSequence,
    game_mode: Option<EntityId>,
    net_mode: NetMode,
    time_seconds: f64,
    tick: u64,
    is_startup: bool,
    has_begun_play: bool,
    event_log: Vec<WorldEvent>,
}

impl World {
    /// Create an empty world with only a persistent level.
    pub fn new(name: impl Into<PackageName>) -> Self {
        let name = name.into();
        Self {
            persistent: LevelContent::new(name.clone(), Vec::new()),
            levels: vec![name.clone()],
            streaming_levels: Vec::new(),
            controllers: BTreeMap::new(),
            pawns: BTreeMap::new(),
            root_sequence: RootSequence {
                name: format!("{name}.Main_Sequence"),
                nested: Vec::new(),
            },
            game_mode: None,
            net_mode: NetMode::default(),
            time_seconds: 0.0,
            tick: 0,
            is_startup: false,
            has_begun_play: false,
            event_log: Vec::new(),
            name,
        }
    }

    /// Build a world from a loaded world package. Registries are populated from its actors.
    pub fn from_package(package: PackageContent) -> Self {
        let streaming_levels = package.streaming_levels.clone();
        let mut world = Self::new(package.name.clone());
        world.persistent = package.into_level();
        world.streaming_levels = streaming_levels;
        let level = world.name.clone();
        let actors: Vec<(EntityId, ActorKind)> = world
            .persistent
            .actors()
            .iter()
            .map(|a| (a.id, a.kind))
            .collect();
        for (id, kind) in actors {
            world.register(&level, id, kind);
        }
        world
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn persistent(&self) -> &LevelContent {
        &self.persistent
    }

    pub fn persistent_mut(&mut self) -> &mut LevelContent {
        &mut self.persistent
    }

    /// Tear the world down to its persistent level's content.
    pub fn into_persistent(self) -> LevelContent {
        self.persistent
    }

    pub fn streaming_levels(&self) -> &[StreamingLevelInfo] {
        &self.streaming_levels
    }

    /// Names of all levels currently part of the world, persistent level first.
    pub fn active_levels(&self) -> &[PackageName] {
        &self.levels
    }

    pub fn is_level_active(&self, package: &PackageName) -> bool {
        self.levels.contains(package)
    }

    /// Add a level to the active collection (no-op if already present).
    pub fn add_level(&mut self, package: &PackageName) {
        if !self.levels.contains(package) {
            self.levels.push(package.clone());
            self.event_log.push(WorldEvent::LevelAdded {
                package: package.clone(),
            });
        }
    }

    /// Remove a level from the active collection. Returns whether it was present.
    pub fn remove_level(&mut self, package: &PackageName) -> bool {
        let before = self.levels.len();
        self.levels.retain(|l| l != package);
        let removed = self.levels.len() != before;
        if removed {
            self.event_log.push(WorldEvent::LevelRemoved {
                package: package.clone(),
            });
        }
        removed
    }

    // --- registries ---

    /// Add an actor to the registry matching its kind.
    pub fn register(&mut self, level: &PackageName, id: EntityId, kind: ActorKind) {
        let entry = RegistryEntry {
            level: level.clone(),
            force_floor_check: false,
        };
        match kind {
            ActorKind::Controller { .. } => {
                self.controllers.insert(id, entry);
            }
            ActorKind::Pawn => {
                self.pawns.insert(id, entry);
            }
            ActorKind::GameMode => {
                self.game_mode = Some(id);
            }
            ActorKind::Generic => {}
        }
    }

    pub fn register_actor(&mut self, level: &PackageName, actor: &Actor) {
        self.register(level, actor.id, actor.kind);
    }

    /// Drop every registry entry owned by `level`. Surviving pawns get a forced floor check.
    /// Returns the number of entries removed.
    pub fn unregister_level(&mut self, level: &PackageName) -> usize {
        let before = self.controllers.len() + self.pawns.len();
        self.controllers.retain(|_, e| &e.level != level);
        self.pawns.retain(|_, e| &e.level != level);
        for entry in self.pawns.values_mut() {
            entry.force_floor_check = true;
        }
        before - (self.controllers.len() + self.pawns.len())
    }

    pub fn unregister(&mut self, id: EntityId) {
        self.controllers.remove(&id);
        self.pawns.remove(&id);
        if self.game_mode == Some(id) {
            self.game_mode = None;
        }
    }

    pub fn controllers(&self) -> &BTreeMap<EntityId, RegistryEntry> {
        &self.controllers
    }

    pub fn pawns(&self) -> &BTreeMap<EntityId, RegistryEntry> {
        &self.pawns
    }

    /// Ids of every registered actor, for reference scans.
    pub fn registered_ids(&self) -> impl Iterator<Item = (&EntityId, &RegistryEntry)> {
        self.controllers.iter().chain(self.pawns.iter())
    }

    pub fn game_mode(&self) -> Option<EntityId> {
        self.game_mode
    }

    pub fn set_game_mode(&mut self, id: Option<EntityId>) {
        self.game_mode = id;
    }

    // --- sequences ---

    pub fn root_sequence(&self) -> &RootSequence {
        &self.root_sequence
    }

    pub fn root_sequence_mut(&mut self) -> &mut RootSequence {
        &mut self.root_sequence
    }

    // --- world info ---

    pub fn net_mode(&self) -> NetMode {
        self.net_mode
    }

    pub fn set_net_mode(&mut self, mode: NetMode) {
        self.net_mode = mode;
    }

    pub fn time_seconds(&self) -> f64 {
        self.time_seconds
    }

    pub fn set_time_seconds(&mut self, seconds: f64) {
        self.time_seconds = seconds;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// True only while BeginPlay is being routed on a level that is becoming active.
    pub fn is_startup(&self) -> bool {
        self.is_startup
    }

    pub fn set_startup(&mut self, startup: bool) {
        self.is_startup = startup;
    }

    pub fn has_begun_play(&self) -> bool {
        self.has_begun_play
    }

    /// Advance simulated time by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.tick += 1;
        self.time_seconds += dt;
        self.event_log.push(WorldEvent::Stepped { tick: self.tick });
    }

    /// Route BeginPlay on every persistent actor that has not yet begun play.
    /// Actors carried over from a previous world keep their state.
    pub fn begin_play(&mut self) -> usize {
        self.is_startup = true;
        let mut routed = 0;
        for actor in self.persistent.actors_mut() {
            if !actor.state.has_begun_play {
                actor.state.script_initialized = true;
                actor.state.has_begun_play = true;
                routed += 1;
            }
        }
        self.is_startup = false;
        self.has_begun_play = true;
        self.event_log.push(WorldEvent::BeganPlay {
            world: self.name.clone(),
        });
        tracing::debug!(world = %self.name, routed, "began play");
        routed
    }

    /// Move actors from another world into this world's persistent level and register them.
    pub fn adopt_actors(&mut self, from: &PackageName, actors: Vec<Actor>) {
        let count = actors.len();
        let level = self.name.clone();
        for actor in actors {
            self.register_actor(&level, &actor);
            self.persistent.push_actor(actor);
        }
        self.event_log.push(WorldEvent::ActorsAdopted {
            from: from.clone(),
            count,
        });
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }
}
