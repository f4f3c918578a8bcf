use crossbeam_channel::{Receiver, Sender, unbounded};
use levelflow_common::{LoadRequestId, PackageGuid, PackageName};
use levelflow_kernel::{LevelContent, NetMode, PackageContent, Role, World};
use levelflow_stream::{
    AsyncContentLoader, FlushMode, LevelStreamingScheduler, LoadCompletion, LoadError, NetworkNotifier, PhysicsHost,
    ReferenceSweeper, StreamingHost,
};

use crate::context::WorldContext;
use crate::hooks::{RetainedActorSet, TravelHooks};
use crate::net::NetSession;
use crate::url::TravelUrl;

/// Errors from starting or driving a seamless travel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TravelError {
    #[error("invalid travel url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("map '{map}' not found")]
    FileNotFound { map: PackageName },
    #[error("'{map}' is not a level package")]
    NotALevel { map: PackageName },
    #[error("travel to '{map}' aborted: {reason}")]
    Aborted { map: PackageName, reason: String },
    #[error("no seamless travel in progress")]
    NotInTransition,
    #[error("destination is already loading")]
    AlreadyLoadingDestination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionState {
    Idle,
    LoadingTransitionWorld,
    PausedAtMidpoint,
    LoadingDestination {
        guid: Option<PackageGuid>,
        url: TravelUrl,
    },
    Committing,
    Cancelled,
}

/// What a controller tick did, for the host's user-facing notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TravelEvent {
    /// A new world was swapped in. `is_final` is false for the transition world.
    Committed { world: PackageName, is_final: bool },
    /// Holding in the transition world until resumed.
    ReachedMidpoint { world: PackageName },
    Completed { world: PackageName },
    /// The travel was abandoned; the previous world stays live.
    Failed { error: TravelError },
}

/// The collaborators a controller tick talks to.
pub struct TravelHost<'a> {
    pub loader: &'a mut dyn AsyncContentLoader,
    pub physics: &'a mut dyn PhysicsHost,
    pub net: &'a mut NetSession,
    pub hooks: &'a mut dyn TravelHooks,
}

impl<'a> TravelHost<'a> {
    pub fn new(
        loader: &'a mut dyn AsyncContentLoader,
        physics: &'a mut dyn PhysicsHost,
        net: &'a mut NetSession,
        hooks: &'a mut dyn TravelHooks,
    ) -> Self {
        Self {
            loader,
            physics,
            net,
            hooks,
        }
    }
}

#[derive(Debug)]
struct PendingLoad {
    request: LoadRequestId,
    package: PackageName,
}

/// Moves the whole simulation to another world through a neutral transition
/// world, without dropping peer connections.
///
/// There is one controller per [`WorldContext`]. Starting a travel while one
/// is in progress either coalesces (same map) or cancels the current one.
pub struct WorldTransitionController {
    state: TransitionState,
    destination: Option<TravelUrl>,
    guid: Option<PackageGuid>,
    transition_map: PackageName,
    pause_at_midpoint: bool,
    /// The transition world is live (or was skipped); the next commit is the final one.
    switched_to_transition: bool,
    needs_cleanup: bool,
    pending: Option<PendingLoad>,
    loaded: Option<PackageContent>,
    sync_started: bool,
    discarded: Vec<LevelContent>,
    completions_tx: Sender<LoadCompletion>,
    completions_rx: Receiver<LoadCompletion>,
}

impl Default for WorldTransitionController {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldTransitionController {
    pub fn new() -> Self {
        Self::with_transition_map(TravelUrl::DEFAULT_TRANSITION_MAP)
    }

    pub fn with_transition_map(map: impl Into<PackageName>) -> Self {
        let (completions_tx, completions_rx) = unbounded();
        Self {
            state: TransitionState::Idle,
            destination: None,
            guid: None,
            transition_map: map.into(),
            pause_at_midpoint: false,
            switched_to_transition: false,
            needs_cleanup: false,
            pending: None,
            loaded: None,
            sync_started: false,
            discarded: Vec::new(),
            completions_tx,
            completions_rx,
        }
    }

    pub fn state(&self) -> &TransitionState {
        &self.state
    }

    pub fn destination(&self) -> Option<&TravelUrl> {
        self.destination.as_ref()
    }

    pub fn transition_map(&self) -> &PackageName {
        &self.transition_map
    }

    pub fn is_in_transition(&self) -> bool {
        !matches!(self.state, TransitionState::Idle | TransitionState::Cancelled)
    }

    pub fn is_paused_at_midpoint(&self) -> bool {
        self.pause_at_midpoint
    }

    /// Begin a seamless travel to `url`.
    ///
    /// A travel already heading to the same map only has its URL replaced; one
    /// heading elsewhere is cancelled first. A missing destination fails
    /// before the current travel is touched.
    pub fn start_travel(
        &mut self,
        ctx: &WorldContext,
        url: TravelUrl,
        guid: Option<PackageGuid>,
        loader: &mut dyn AsyncContentLoader,
    ) -> Result<(), TravelError> {
        let url = if url.is_restart() || url.map.is_empty() {
            ctx.last_url
                .clone()
                .unwrap_or_else(|| TravelUrl::new(ctx.world.name().as_str()))
        } else {
            url
        };
        let map = url.map_name();
        let _span = tracing::info_span!("start_travel", from = %ctx.world.name(), to = %map).entered();

        if !loader.package_exists(&map, guid) {
            tracing::warn!(%map, "travel destination not found");
            return Err(TravelError::FileNotFound { map });
        }

        let mut cancelled_existing = false;
        if self.is_in_transition() {
            let same_map = self.destination.as_ref().is_some_and(|d| d.map_name() == map);
            if same_map {
                tracing::info!(url = %url, "travel already in progress, replacing url");
                if let TransitionState::LoadingDestination { url: current, .. } = &mut self.state {
                    *current = url.clone();
                }
                self.destination = Some(url);
                return Ok(());
            }
            tracing::warn!(
                current = %self.destination.as_ref().map(|d| d.map.as_str()).unwrap_or_default(),
                next = %map,
                "cancelling travel in progress"
            );
            self.cancel();
            cancelled_existing = true;
        }

        self.destination = Some(url);
        self.guid = guid;
        self.sync_started = false;
        self.needs_cleanup = false;

        if ctx.world.name() == &self.transition_map || map == self.transition_map {
            self.switched_to_transition = true;
            if cancelled_existing {
                // Let the abandoned load finish and be reclaimed before starting the next one.
                self.pause_at_midpoint = true;
                self.needs_cleanup = true;
                self.state = TransitionState::PausedAtMidpoint;
            } else {
                self.start_loading_destination(loader);
            }
            return Ok(());
        }

        if !loader.package_exists(&self.transition_map, None) {
            tracing::error!(map = %self.transition_map, "transition map not found");
            let map = self.transition_map.clone();
            self.cancel();
            return Err(TravelError::FileNotFound { map });
        }
        self.switched_to_transition = false;
        let request = loader.request_load(&self.transition_map, None, &self.completions_tx);
        self.pending = Some(PendingLoad {
            request,
            package: self.transition_map.clone(),
        });
        self.state = TransitionState::LoadingTransitionWorld;
        tracing::info!(transition = %self.transition_map, "loading transition world");
        Ok(())
    }

    /// Abandon the travel in progress. Safe in any state.
    ///
    /// Loaded but uncommitted content is reclaimed on the next tick; a load
    /// still in flight is discarded when it completes.
    pub fn cancel(&mut self) {
        if let Some(package) = self.loaded.take() {
            self.discarded.push(package.into_level());
        }
        self.pending = None;
        self.sync_started = false;
        if self.is_in_transition() {
            tracing::info!(
                destination = %self.destination.as_ref().map(|d| d.map.as_str()).unwrap_or_default(),
                "travel cancelled"
            );
            self.state = TransitionState::Cancelled;
        }
        self.destination = None;
    }

    /// Ask the travel to hold once the transition world is live.
    ///
    /// Pausing is rejected once the transition world has been switched to;
    /// unpausing there starts the destination load. Returns whether the
    /// request was accepted.
    pub fn set_pause_at_midpoint(&mut self, pause: bool, loader: &mut dyn AsyncContentLoader) -> bool {
        if !self.is_in_transition() {
            tracing::warn!("set_pause_at_midpoint: not in a seamless travel");
            return false;
        }
        if self.switched_to_transition && pause {
            tracing::warn!("set_pause_at_midpoint: already switched to the transition world");
            return false;
        }
        self.pause_at_midpoint = pause;
        if !pause && self.state == TransitionState::PausedAtMidpoint && !self.needs_cleanup {
            self.start_loading_destination(loader);
        }
        true
    }

    /// Continue from the midpoint.
    pub fn resume(&mut self, loader: &mut dyn AsyncContentLoader) -> Result<(), TravelError> {
        match self.state {
            TransitionState::Idle | TransitionState::Cancelled => Err(TravelError::NotInTransition),
            TransitionState::LoadingDestination { .. } | TransitionState::Committing => {
                Err(TravelError::AlreadyLoadingDestination)
            }
            _ => {
                self.set_pause_at_midpoint(false, loader);
                Ok(())
            }
        }
    }

    fn start_loading_destination(&mut self, loader: &mut dyn AsyncContentLoader) {
        let Some(url) = self.destination.clone() else {
            return;
        };
        let map = url.map_name();
        let request = loader.request_load(&map, self.guid, &self.completions_tx);
        tracing::info!(destination = %map, ?request, "loading destination");
        self.pending = Some(PendingLoad { request, package: map });
        self.sync_started = false;
        self.state = TransitionState::LoadingDestination { guid: self.guid, url };
    }

    /// One travel update: apply load completions, reclaim abandoned content,
    /// and commit a loaded world once it is safe to.
    pub fn tick(&mut self, ctx: &mut WorldContext, host: &mut TravelHost<'_>) -> Vec<TravelEvent> {
        let mut events = Vec::new();
        self.receive(&mut events);
        self.reclaim(ctx, host.net);

        match self.state {
            TransitionState::Cancelled => {
                self.state = TransitionState::Idle;
            }
            TransitionState::PausedAtMidpoint if self.needs_cleanup => {
                if !host.loader.is_loading_anything() {
                    self.needs_cleanup = false;
                    self.pause_at_midpoint = false;
                    self.start_loading_destination(host.loader);
                }
            }
            TransitionState::LoadingTransitionWorld if self.loaded.is_some() => {
                self.commit(ctx, host, &mut events);
            }
            TransitionState::LoadingDestination { .. } => {
                let synced = match self.loaded.as_ref() {
                    Some(package) => {
                        if !self.sync_started {
                            host.net.begin_package_sync(&package.name, package.checksum());
                            self.sync_started = true;
                        }
                        host.net.process_confirmations();
                        host.net.is_package_sync_complete(&package.name)
                    }
                    None => false,
                };
                if synced {
                    self.commit(ctx, host, &mut events);
                }
            }
            _ => {}
        }
        events
    }

    fn receive(&mut self, events: &mut Vec<TravelEvent>) {
        let completions: Vec<LoadCompletion> = self.completions_rx.try_iter().collect();
        for done in completions {
            let current = self
                .pending
                .as_ref()
                .is_some_and(|p| p.request == done.request && p.package == done.package);
            if !current {
                if let Ok(package) = done.result {
                    tracing::debug!(package = %package.name, "discarding stale travel load");
                    self.discarded.push(package.into_level());
                }
                continue;
            }
            self.pending = None;
            let map = done.package;
            let error = match done.result {
                Ok(package) if package.is_level() => {
                    tracing::debug!(%map, "travel package loaded");
                    self.loaded = Some(package);
                    continue;
                }
                Ok(package) => {
                    self.discarded.push(package.into_level());
                    TravelError::NotALevel { map }
                }
                Err(LoadError::ContentNotFound { .. }) => TravelError::FileNotFound { map },
                Err(LoadError::NotALevel { .. }) => TravelError::NotALevel { map },
                Err(e) => TravelError::Aborted {
                    map,
                    reason: e.to_string(),
                },
            };
            tracing::error!(%error, "seamless travel failed");
            self.cancel();
            events.push(TravelEvent::Failed { error });
        }
    }

    fn reclaim(&mut self, ctx: &mut WorldContext, net: &mut NetSession) {
        if self.discarded.is_empty() {
            return;
        }
        for content in self.discarded.drain(..) {
            ctx.streaming.discard(content, &mut *net);
        }
        let stats = ctx
            .streaming
            .collect_garbage(&mut ctx.world, &mut ReferenceSweeper, &mut *net);
        tracing::debug!(levels = stats.levels_freed, actors = stats.actors_freed, "reclaimed abandoned travel content");
    }

    /// Swap the loaded package in as the live world. Runs to completion in one call.
    fn commit(&mut self, ctx: &mut WorldContext, host: &mut TravelHost<'_>, events: &mut Vec<TravelEvent>) {
        let (Some(package), Some(url)) = (self.loaded.take(), self.destination.clone()) else {
            return;
        };
        let is_final = self.switched_to_transition;
        self.state = TransitionState::Committing;
        let _span = tracing::info_span!("travel_commit", from = %ctx.world.name(), to = %package.name, is_final).entered();

        {
            let mut streaming = StreamingHost::new(&mut *host.loader, &mut *host.physics, &mut *host.net);
            if let Err(e) = ctx.streaming.flush(&mut ctx.world, &mut streaming, &[], FlushMode::VisibilityOnly) {
                tracing::warn!(error = %e, "streaming did not settle before world swap");
            }
        }

        let mut keep = RetainedActorSet::new();
        if !is_final {
            if let Some(game) = ctx.world.game_mode() {
                keep.insert(game);
            }
        }
        for actor in ctx.world.persistent().actors() {
            if actor.is_player_controller() {
                keep.insert(actor.id);
            }
        }
        host.hooks.seamless_travel_actor_list(!is_final, &ctx.world, &mut keep);

        let mut carried = ctx
            .world
            .persistent_mut()
            .drain_actors_where(|a| a.is_dynamic() && (keep.contains(a.id) || a.role < Role::Authority));
        for actor in &mut carried {
            for r in &mut actor.cross_level_refs {
                r.resolved = None;
            }
        }
        let carried_count = carried.len();

        let mut next = World::from_package(package);
        next.set_net_mode(ctx.world.net_mode());
        next.set_time_seconds(ctx.world.time_seconds());
        next.adopt_actors(ctx.world.name(), carried);
        if is_final && next.game_mode().is_none() && next.net_mode() != NetMode::Client {
            if let Some(game) = host.hooks.create_game_mode(&next, &url) {
                let level = next.name().clone();
                next.register_actor(&level, &game);
                next.persistent_mut().push_actor(game);
            }
        }

        let next_streaming = LevelStreamingScheduler::from_world(&next, ctx.streaming.config().clone());
        let old_world = std::mem::replace(&mut ctx.world, next);
        let old_streaming = std::mem::replace(&mut ctx.streaming, next_streaming);
        let old_name = old_world.name().clone();

        let mut condemned = old_streaming.into_contents();
        condemned.push(old_world.into_persistent());
        for mut content in condemned {
            host.physics.tear_down_bodies(&mut content);
            ctx.streaming.discard(content, &mut *host.net);
        }
        let stats = ctx
            .streaming
            .collect_garbage(&mut ctx.world, &mut ReferenceSweeper, &mut *host.net);
        if !stats.dangling.is_empty() {
            tracing::error!(world = %old_name, dangling = stats.dangling.len(), "old world not fully collected");
        }

        ctx.world.begin_play();
        let world = ctx.world.name().clone();
        host.hooks.notify_loaded_world(&world, is_final);
        host.net.notify_world_swapped(&world);
        tracing::info!(from = %old_name, to = %world, carried = carried_count, freed = stats.actors_freed, "world swapped");
        events.push(TravelEvent::Committed {
            world: world.clone(),
            is_final,
        });

        if is_final {
            ctx.last_url = Some(url);
            self.destination = None;
            self.guid = None;
            self.switched_to_transition = false;
            self.state = TransitionState::Idle;
            host.hooks.post_seamless_travel(&ctx.world);
            events.push(TravelEvent::Completed { world });
        } else {
            self.switched_to_transition = true;
            if self.pause_at_midpoint {
                tracing::info!(%world, "paused at midpoint");
                self.state = TransitionState::PausedAtMidpoint;
                events.push(TravelEvent::ReachedMidpoint { world });
            } else {
                self.start_loading_destination(host.loader);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::StandardHooks;
    use glam::Vec3;
    use levelflow_common::{Checksum, EntityId};
    use levelflow_kernel::{Actor, ActorKind, PackageKind, PolicySpec, StreamingLevelInfo};
    use levelflow_stream::{BodyRegistry, CatalogLoader, StreamConfig};

    struct Rig {
        loader: CatalogLoader,
        physics: BodyRegistry,
        net: NetSession,
        hooks: StandardHooks,
        ctx: WorldContext,
        travel: WorldTransitionController,
    }

    impl Rig {
        fn new(start: PackageContent, catalog: Vec<PackageContent>) -> Self {
            let mut loader = CatalogLoader::new();
            for package in catalog {
                loader.insert(package);
            }
            let mut world = World::from_package(start);
            world.begin_play();
            Self {
                loader,
                physics: BodyRegistry::new(),
                net: NetSession::new(),
                hooks: StandardHooks::new(),
                ctx: WorldContext::new(world, StreamConfig::unbounded()),
                travel: WorldTransitionController::new(),
            }
        }

        fn start(&mut self, url: &str) -> Result<(), TravelError> {
            let url = TravelUrl::parse(url)?;
            self.travel.start_travel(&self.ctx, url, None, &mut self.loader)
        }

        fn step(&mut self) -> Vec<TravelEvent> {
            self.loader.poll();
            let mut host = TravelHost::new(&mut self.loader, &mut self.physics, &mut self.net, &mut self.hooks);
            self.travel.tick(&mut self.ctx, &mut host)
        }

        fn run(&mut self, max: usize) -> Vec<TravelEvent> {
            let mut events = Vec::new();
            for _ in 0..max {
                events.extend(self.step());
                if !self.travel.is_in_transition() {
                    break;
                }
            }
            events
        }

        fn actor_named(&self, name: &str) -> Option<&Actor> {
            self.ctx.world.persistent().actors().iter().find(|a| a.name == name)
        }
    }

    fn names(list: &[&str]) -> Vec<PackageName> {
        list.iter().map(|n| PackageName::from(*n)).collect()
    }

    fn entry() -> PackageContent {
        PackageContent::world("Entry", vec![Actor::new("entry_light", ActorKind::Generic)])
    }

    fn map(name: &str) -> PackageContent {
        PackageContent::world(
            name,
            vec![
                Actor::static_mesh(format!("{name}_floor"), Vec3::ZERO),
                Actor::new(format!("{name}_bot"), ActorKind::Pawn),
            ],
        )
    }

    fn start_world() -> (PackageContent, EntityId) {
        let pc = Actor::new("pc", ActorKind::Controller { is_player: true });
        let pc_id = pc.id;
        let mut proxy = Actor::new("proxy", ActorKind::Pawn);
        proxy.role = Role::SimulatedProxy;
        let package = PackageContent::world(
            "Start",
            vec![
                Actor::new("game", ActorKind::GameMode),
                pc,
                proxy,
                Actor::new("bot", ActorKind::Pawn),
                Actor::static_mesh("floor", Vec3::ZERO),
            ],
        );
        (package, pc_id)
    }

    #[test]
    fn travel_passes_through_transition_world() {
        let (start, pc_id) = start_world();
        let mut rig = Rig::new(start, vec![entry(), map("Dest")]);
        rig.start("Dest?Name=Ash").unwrap();
        assert_eq!(rig.travel.state(), &TransitionState::LoadingTransitionWorld);

        let events = rig.run(10);
        assert_eq!(
            events,
            vec![
                TravelEvent::Committed {
                    world: "Entry".into(),
                    is_final: false
                },
                TravelEvent::Committed {
                    world: "Dest".into(),
                    is_final: true
                },
                TravelEvent::Completed { world: "Dest".into() },
            ]
        );
        assert_eq!(rig.loader.requests(), names(&["Entry", "Dest"]));
        assert_eq!(rig.ctx.world.name(), &PackageName::from("Dest"));
        assert_eq!(rig.travel.state(), &TransitionState::Idle);

        // Player controller and the non-authority proxy survive both hops.
        assert!(rig.ctx.world.controllers().contains_key(&pc_id));
        assert!(rig.actor_named("pc").unwrap().state.has_begun_play);
        assert!(rig.actor_named("proxy").is_some());
        assert!(rig.actor_named("bot").is_none());
        assert!(rig.actor_named("floor").is_none());
        assert!(rig.actor_named("entry_light").is_none());

        // The old game mode stops at the transition world; the destination spawns its own.
        assert!(rig.actor_named("game").is_none());
        let game = rig.ctx.world.game_mode().unwrap();
        assert_eq!(rig.ctx.world.persistent().actor(game).unwrap().name, "GameMode");

        assert_eq!(
            rig.hooks.loaded_worlds,
            vec![(PackageName::from("Entry"), false), (PackageName::from("Dest"), true)]
        );
        assert_eq!(rig.hooks.completed, vec![PackageName::from("Dest")]);
        assert_eq!(rig.ctx.last_url.as_ref().unwrap().option("Name"), Some("Ash"));
        assert_eq!(rig.ctx.streaming.gc().last_collected(), names(&["Entry"]));
    }

    #[test]
    fn client_keeps_world_info_and_spawns_no_game_mode() {
        let pc = Actor::new("pc", ActorKind::Controller { is_player: true });
        let mut rig = Rig::new(PackageContent::world("Start", vec![pc]), vec![entry(), map("Dest")]);
        rig.ctx.world.set_net_mode(NetMode::Client);
        rig.ctx.world.step(0.25);
        rig.ctx.world.step(0.25);

        rig.start("Dest?Game=Arena").unwrap();
        let events = rig.run(10);
        assert_eq!(events.last(), Some(&TravelEvent::Completed { world: "Dest".into() }));

        assert_eq!(rig.ctx.world.name(), &PackageName::from("Dest"));
        assert_eq!(rig.ctx.world.net_mode(), NetMode::Client);
        assert_eq!(rig.ctx.world.time_seconds(), 0.5);
        assert!(rig.ctx.world.game_mode().is_none());
        assert!(rig.actor_named("Arena").is_none());
        assert!(rig.actor_named("pc").is_some());
    }

    #[test]
    fn game_mode_rides_into_transition_world() {
        let (start, _) = start_world();
        let mut rig = Rig::new(start, vec![entry(), map("Dest")]);
        rig.start("Dest").unwrap();
        assert!(rig.travel.set_pause_at_midpoint(true, &mut rig.loader));
        rig.run(10);
        assert_eq!(rig.ctx.world.name(), &PackageName::from("Entry"));
        assert!(rig.actor_named("game").is_some());
        assert_eq!(
            rig.ctx.world.game_mode(),
            rig.actor_named("game").map(|a| a.id)
        );
    }

    #[test]
    fn same_destination_is_coalesced() {
        let (start, _) = start_world();
        let mut rig = Rig::new(start, vec![entry(), map("Dest")]);
        rig.start("Dest?Name=First").unwrap();
        rig.start("Dest?Name=Second").unwrap();
        assert_eq!(rig.loader.requests().len(), 1);

        let events = rig.run(10);
        let completed = events
            .iter()
            .filter(|e| matches!(e, TravelEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(rig.loader.requests(), names(&["Entry", "Dest"]));
        assert_eq!(rig.ctx.last_url.as_ref().unwrap().option("Name"), Some("Second"));
    }

    #[test]
    fn coalescing_while_loading_destination_replaces_url() {
        let mut rig = Rig::new(entry(), vec![entry(), map("Dest")]);
        rig.start("Dest?Team=1").unwrap();
        rig.start("Dest?Team=2").unwrap();
        match rig.travel.state() {
            TransitionState::LoadingDestination { url, .. } => assert_eq!(url.option("Team"), Some("2")),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(rig.loader.requests().len(), 1);
    }

    #[test]
    fn different_destination_cancels_first() {
        let mut rig = Rig::new(entry(), vec![entry(), map("A"), map("B")]);
        rig.start("A").unwrap();
        rig.start("B").unwrap();
        assert_eq!(rig.travel.state(), &TransitionState::PausedAtMidpoint);

        // A's load lands, is discarded and collected, then B starts.
        let events = rig.step();
        assert!(events.is_empty());
        assert_eq!(rig.ctx.streaming.gc().last_collected(), names(&["A"]));
        assert!(matches!(
            rig.travel.state(),
            TransitionState::LoadingDestination { url, .. } if url.map == "B"
        ));

        let events = rig.run(10);
        assert_eq!(
            events.last(),
            Some(&TravelEvent::Completed { world: "B".into() })
        );
        assert_eq!(rig.ctx.world.name(), &PackageName::from("B"));
        assert!(rig.actor_named("A_bot").is_none());
        assert!(rig.actor_named("B_bot").is_some());
        assert_eq!(rig.loader.requests(), names(&["A", "B"]));
    }

    #[test]
    fn cancel_before_transition_world_reloads_it() {
        let (start, _) = start_world();
        let mut rig = Rig::new(start, vec![entry(), map("A"), map("B")]);
        rig.start("A").unwrap();
        rig.start("B").unwrap();
        assert_eq!(rig.travel.state(), &TransitionState::LoadingTransitionWorld);

        rig.run(10);
        assert_eq!(rig.ctx.world.name(), &PackageName::from("B"));
        assert_eq!(
            rig.loader.requests(),
            names(&["Entry", "Entry", "B"])
        );
    }

    #[test]
    fn explicit_cancel_returns_to_idle() {
        let (start, _) = start_world();
        let mut rig = Rig::new(start, vec![entry(), map("Dest")]);
        rig.start("Dest").unwrap();
        rig.travel.cancel();
        assert_eq!(rig.travel.state(), &TransitionState::Cancelled);
        assert!(!rig.travel.is_in_transition());

        let events = rig.step();
        assert!(events.is_empty());
        assert_eq!(rig.travel.state(), &TransitionState::Idle);
        assert_eq!(rig.ctx.world.name(), &PackageName::from("Start"));
        assert!(rig.actor_named("bot").is_some());
        assert_eq!(rig.ctx.streaming.gc().last_collected(), names(&["Entry"]));
        assert_eq!(rig.travel.resume(&mut rig.loader), Err(TravelError::NotInTransition));
    }

    #[test]
    fn checksum_mismatch_closes_only_that_peer() {
        let dest = map("Dest");
        let good = dest.checksum();
        let mut rig = Rig::new(entry(), vec![entry(), dest]);
        let a = rig.net.connect();
        let b = rig.net.connect();
        rig.net.install_package(a, "Dest", good);
        rig.net.install_package(b, "Dest", Checksum::of_bytes(b"stale build"));

        rig.start("Dest").unwrap();
        let events = rig.run(10);

        assert!(events.contains(&TravelEvent::Committed {
            world: "Dest".into(),
            is_final: true
        }));
        assert!(rig.net.connection(a).unwrap().is_open());
        let closed = rig.net.connection(b).unwrap();
        assert!(!closed.is_open());
        assert!(closed.close_reason().unwrap().contains("mismatch"));
        assert_eq!(rig.net.current_world(), Some(&PackageName::from("Dest")));
    }

    #[test]
    fn missing_maps_are_rejected_up_front() {
        let (start, _) = start_world();
        let mut rig = Rig::new(start.clone(), vec![entry(), map("Dest")]);
        assert_eq!(
            rig.start("Nowhere"),
            Err(TravelError::FileNotFound { map: "Nowhere".into() })
        );
        assert_eq!(rig.travel.state(), &TransitionState::Idle);
        assert!(rig.loader.requests().is_empty());

        let mut rig = Rig::new(start, vec![map("Dest")]);
        assert_eq!(
            rig.start("Dest"),
            Err(TravelError::FileNotFound { map: "Entry".into() })
        );
        assert!(!rig.travel.is_in_transition());
    }

    #[test]
    fn non_level_destination_fails_and_keeps_world() {
        let mut textures = PackageContent::level("Textures", vec![Actor::new("tex", ActorKind::Generic)]);
        textures.kind = PackageKind::Asset;
        let mut rig = Rig::new(entry(), vec![entry(), textures]);
        rig.start("Textures").unwrap();

        let events = rig.step();
        assert_eq!(
            events,
            vec![TravelEvent::Failed {
                error: TravelError::NotALevel { map: "Textures".into() }
            }]
        );
        assert_eq!(rig.travel.state(), &TransitionState::Idle);
        assert_eq!(rig.ctx.world.name(), &PackageName::from("Entry"));
        assert!(rig.actor_named("entry_light").is_some());
    }

    #[test]
    fn pause_holds_until_resumed() {
        let (start, _) = start_world();
        let mut rig = Rig::new(start, vec![entry(), map("Dest")]);
        assert!(!rig.travel.set_pause_at_midpoint(true, &mut rig.loader));
        rig.start("Dest").unwrap();
        assert!(rig.travel.set_pause_at_midpoint(true, &mut rig.loader));

        let events = rig.step();
        assert_eq!(
            events.last(),
            Some(&TravelEvent::ReachedMidpoint { world: "Entry".into() })
        );
        for _ in 0..3 {
            assert!(rig.step().is_empty());
        }
        assert_eq!(rig.travel.state(), &TransitionState::PausedAtMidpoint);
        assert_eq!(rig.loader.requests().len(), 1);
        assert!(!rig.travel.set_pause_at_midpoint(true, &mut rig.loader));

        rig.travel.resume(&mut rig.loader).unwrap();
        assert_eq!(
            rig.travel.resume(&mut rig.loader),
            Err(TravelError::AlreadyLoadingDestination)
        );
        let events = rig.run(10);
        assert_eq!(
            events.last(),
            Some(&TravelEvent::Completed { world: "Dest".into() })
        );
    }

    #[test]
    fn travel_to_transition_map_is_a_single_hop() {
        let yard_guard = Actor::new("guard", ActorKind::Pawn);
        let guard_id = yard_guard.id;
        let yard = PackageContent::level("Yard", vec![yard_guard]);
        let pc = Actor::new("pc", ActorKind::Controller { is_player: true }).with_ref(guard_id);
        let start = PackageContent::world("Start", vec![pc]).with_streaming_level(StreamingLevelInfo {
            package: "Yard".into(),
            policy: PolicySpec::AlwaysLoaded,
            offset: Vec3::ZERO,
            block_on_load: false,
        });
        let mut rig = Rig::new(start, vec![entry(), yard]);
        {
            let mut host = StreamingHost::new(&mut rig.loader, &mut rig.physics, &mut rig.net);
            rig.ctx
                .streaming
                .flush(&mut rig.ctx.world, &mut host, &[], FlushMode::Full)
                .unwrap();
        }
        assert!(rig.actor_named("pc").unwrap().cross_level_refs[0].is_resolved());
        assert_eq!(rig.physics.total_bodies(), 1);

        rig.start("Entry").unwrap();
        let events = rig.run(10);
        assert_eq!(
            events.first(),
            Some(&TravelEvent::Committed {
                world: "Entry".into(),
                is_final: true
            })
        );
        assert_eq!(rig.loader.requests(), names(&["Yard", "Entry"]));
        assert!(!rig.actor_named("pc").unwrap().cross_level_refs[0].is_resolved());
        assert_eq!(rig.physics.total_bodies(), 0);
        assert!(rig.ctx.streaming.descriptors().is_empty());
        assert!(rig.ctx.streaming.gc().last_collected().contains(&"Yard".into()));
    }

    #[test]
    fn restart_reuses_last_url() {
        let (start, _) = start_world();
        let mut rig = Rig::new(start, vec![entry(), map("Dest")]);
        rig.start("Dest?Name=Ash").unwrap();
        rig.run(10);

        rig.start("?restart").unwrap();
        let dest = rig.travel.destination().unwrap();
        assert_eq!(dest.map, "Dest");
        assert_eq!(dest.option("Name"), Some("Ash"));
    }
}
