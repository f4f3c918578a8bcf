use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::Vec3;
use levelflow_common::PackageName;
use levelflow_kernel::{LevelContent, World};
use std::time::Instant;

use crate::activation::{self, ActivationContext, ActivationObserver, ActivationSlot};
use crate::budget::{BudgetTracker, FrameTimer, StreamConfig, StreamStats, TickBudget};
use crate::deactivation::{self, DeactivationContext};
use crate::descriptor::LevelDescriptor;
use crate::gc::{CollectionStats, GarbageCollector, GcDeferralQueue, ReferenceSweeper};
use crate::loader::{AsyncContentLoader, LoadCompletion, LoadError};
use crate::notify::NetworkNotifier;
use crate::physics::PhysicsHost;

/// Errors from scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no streaming level named '{0}'")]
    UnknownLevel(PackageName),
    #[error("streaming level '{0}' is already registered")]
    DuplicateLevel(PackageName),
    #[error("streaming flush did not settle after {iterations} iterations")]
    FlushStalled { iterations: usize },
}

/// Which work [`LevelStreamingScheduler::flush`] waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Outstanding loads and every pending show/hide.
    Full,
    /// Only show/hide of content that is already loaded.
    VisibilityOnly,
}

/// The collaborators a tick talks to.
pub struct StreamingHost<'a> {
    pub loader: &'a mut dyn AsyncContentLoader,
    pub physics: &'a mut dyn PhysicsHost,
    pub net: &'a mut dyn NetworkNotifier,
    pub observer: Option<&'a mut dyn ActivationObserver>,
}

impl<'a> StreamingHost<'a> {
    pub fn new(
        loader: &'a mut dyn AsyncContentLoader,
        physics: &'a mut dyn PhysicsHost,
        net: &'a mut dyn NetworkNotifier,
    ) -> Self {
        Self {
            loader,
            physics,
            net,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a mut dyn ActivationObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Drives level loading, activation, deactivation and unloading once per tick.
pub struct LevelStreamingScheduler {
    config: StreamConfig,
    descriptors: Vec<LevelDescriptor>,
    slot: ActivationSlot,
    gc: GcDeferralQueue,
    completions_tx: Sender<LoadCompletion>,
    completions_rx: Receiver<LoadCompletion>,
    frozen: bool,
    block_on_load_requested: bool,
    gc_requested: bool,
    stats: StreamStats,
    timer: FrameTimer,
}

impl LevelStreamingScheduler {
    pub fn new(config: StreamConfig) -> Self {
        let (completions_tx, completions_rx) = unbounded();
        Self {
            config,
            descriptors: Vec::new(),
            slot: ActivationSlot::default(),
            gc: GcDeferralQueue::new(),
            completions_tx,
            completions_rx,
            frozen: false,
            block_on_load_requested: false,
            gc_requested: false,
            stats: StreamStats::default(),
            timer: FrameTimer::new(120),
        }
    }

    /// A scheduler with one descriptor per streaming level the world lists.
    pub fn from_world(world: &World, config: StreamConfig) -> Self {
        let mut scheduler = Self::new(config);
        for info in world.streaming_levels() {
            if scheduler.find(&info.package).is_some() {
                tracing::warn!(level = %info.package, "duplicate streaming level ignored");
                continue;
            }
            scheduler.descriptors.push(LevelDescriptor::from_info(info));
        }
        scheduler
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &[LevelDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, package: &PackageName) -> Option<&LevelDescriptor> {
        self.find(package).map(|i| &self.descriptors[i])
    }

    pub fn descriptor_mut(&mut self, package: &PackageName) -> Option<&mut LevelDescriptor> {
        self.find(package).map(move |i| &mut self.descriptors[i])
    }

    pub fn gc(&self) -> &GcDeferralQueue {
        &self.gc
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    fn find(&self, package: &PackageName) -> Option<usize> {
        self.descriptors.iter().position(|d| d.package() == package)
    }

    pub fn add_descriptor(&mut self, descriptor: LevelDescriptor) -> Result<(), StreamError> {
        if self.find(descriptor.package()).is_some() {
            return Err(StreamError::DuplicateLevel(descriptor.package().clone()));
        }
        tracing::debug!(level = %descriptor.package(), "streaming level added");
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Set event-driven load/visibility flags. Returns false if the level's policy ignores them.
    pub fn set_scripted(&mut self, package: &PackageName, loaded: bool, visible: bool) -> Result<bool, StreamError> {
        let desc = self
            .descriptor_mut(package)
            .ok_or_else(|| StreamError::UnknownLevel(package.clone()))?;
        let accepted = desc.policy_mut().set_requested(loaded, visible);
        if !accepted {
            tracing::warn!(level = %package, "policy ignores scripted flags");
        }
        Ok(accepted)
    }

    /// Stop evaluating the level's policy; drop the descriptor once it is fully unloaded.
    pub fn request_unload_and_removal(&mut self, package: &PackageName) -> Result<(), StreamError> {
        let desc = self
            .descriptor_mut(package)
            .ok_or_else(|| StreamError::UnknownLevel(package.clone()))?;
        desc.request_removal();
        Ok(())
    }

    /// A frozen scheduler ignores ticks.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Whether some level is part way through activation.
    pub fn is_visibility_request_pending(&self) -> bool {
        !self.slot.is_idle()
    }

    pub fn mid_activation(&self) -> Option<&PackageName> {
        self.slot.busy_with()
    }

    /// Levels that want to be loaded but whose last load failed.
    pub fn stalled_levels(&self) -> Vec<&PackageName> {
        self.descriptors
            .iter()
            .filter(|d| d.is_stalled())
            .map(|d| d.package())
            .collect()
    }

    /// Set during the last tick when a load had to bypass the GC gate.
    pub fn block_on_load_requested(&self) -> bool {
        self.block_on_load_requested
    }

    /// Levels are waiting to be reclaimed; the host should collect soon.
    pub fn gc_requested(&self) -> bool {
        self.gc_requested
    }

    /// Consume the scheduler, returning every level content it still owns.
    pub fn into_contents(mut self) -> Vec<LevelContent> {
        let mut contents = self.gc.take_quarantined();
        contents.extend(self.descriptors.iter_mut().filter_map(|d| d.take_content()));
        contents
    }

    /// Hand content this scheduler never owned to the next collection.
    pub fn discard(&mut self, content: LevelContent, net: &mut dyn NetworkNotifier) {
        self.gc.quarantine(content, net);
        self.gc_requested = true;
    }

    /// One streaming update.
    pub fn tick(
        &mut self,
        world: &mut World,
        host: &mut StreamingHost<'_>,
        viewers: &[Vec3],
        budget: TickBudget,
    ) -> StreamStats {
        if self.frozen {
            return StreamStats::default();
        }
        let _span = tracing::info_span!("stream_tick", world = %world.name()).entered();
        let started = Instant::now();
        let mut budget = BudgetTracker::start(budget);
        let mut stats = StreamStats::default();
        self.block_on_load_requested = false;

        let origin = [Vec3::ZERO];
        let viewers = if viewers.is_empty() { &origin[..] } else { viewers };

        self.drain_completions(host.net);
        self.evaluate_policies(viewers);

        let mut sync_load = false;
        for desc in &mut self.descriptors {
            let wants_load = desc.requested_loaded()
                && !desc.is_loaded()
                && !desc.has_load_request_pending()
                && desc.load_failure().is_none();
            if !wants_load {
                continue;
            }
            if self.gc.pending_count() > 0 && !desc.should_block_on_load {
                self.gc_requested = true;
                continue;
            }
            if let Some(resident) = host.loader.find_resident(desc.package()) {
                if resident.is_level() {
                    tracing::debug!(level = %desc.package(), "associated resident content");
                    desc.attach_content(resident.into_level());
                    continue;
                }
            }
            let request = host.loader.request_load(desc.package(), None, &self.completions_tx);
            desc.set_load_request(Some(request));
            stats.loads_requested_this_tick += 1;
            tracing::debug!(level = %desc.package(), ?request, "load requested");
            if desc.should_block_on_load {
                self.block_on_load_requested = true;
                sync_load = true;
            }
        }
        if stats.loads_requested_this_tick > 0 && !self.config.background_streaming {
            sync_load = true;
        }
        if !world.has_begun_play() && host.loader.is_loading_anything() {
            tracing::debug!("initial bring-up: flushing loads");
            sync_load = true;
        }
        if sync_load {
            host.loader.flush_all();
            self.drain_completions(host.net);
        }

        stats.levels_deactivated_this_tick = self.update_visibility(world, host, &mut budget);
        stats.unloads_requested_this_tick = self.update_unloads();
        self.remove_finished();

        self.gc_requested |= self.gc.pending_count() > 0 || !self.gc.quarantined().is_empty();
        stats.steps_this_tick = budget.steps();
        stats.visible_levels = self.descriptors.iter().filter(|d| d.is_visible()).count();
        stats.loaded_levels = self.descriptors.iter().filter(|d| d.is_loaded()).count();
        stats.tick_time = started.elapsed();
        self.timer.record(stats.tick_time);
        self.stats = stats.clone();
        stats
    }

    fn drain_completions(&mut self, net: &mut dyn NetworkNotifier) {
        let completions: Vec<LoadCompletion> = self.completions_rx.try_iter().collect();
        for done in completions {
            let owner = self
                .descriptors
                .iter_mut()
                .find(|d| d.package() == &done.package && d.load_request() == Some(done.request));
            match (owner, done.result) {
                (Some(desc), Ok(package)) if package.is_level() => {
                    tracing::debug!(level = %desc.package(), "load complete");
                    desc.attach_content(package.into_level());
                }
                (Some(desc), Ok(_)) => {
                    let err = LoadError::NotALevel {
                        package: done.package,
                    };
                    tracing::warn!(error = %err, "streaming stalled");
                    desc.set_load_request(None);
                    desc.set_load_failure(Some(err));
                }
                (Some(desc), Err(err)) => {
                    tracing::warn!(error = %err, "streaming stalled");
                    desc.set_load_request(None);
                    desc.set_load_failure(Some(err));
                }
                (None, Ok(package)) => {
                    tracing::debug!(level = %package.name, "discarding stale load");
                    self.gc.quarantine(package.into_level(), net);
                }
                (None, Err(_)) => {}
            }
        }
    }

    fn evaluate_policies(&mut self, viewers: &[Vec3]) {
        let background = self.config.background_streaming;
        for desc in &mut self.descriptors {
            let (mut load, mut visible) = if desc.is_requesting_removal() {
                (false, false)
            } else {
                let load = !background || desc.policy().should_be_loaded(viewers);
                (load, load && desc.policy().should_be_visible(viewers))
            };
            // A level part way through activation must be allowed to finish.
            if desc.has_visibility_request_pending() {
                load = true;
                visible = true;
            }
            if !load && desc.load_failure().is_some() {
                desc.set_load_failure(None);
            }
            desc.set_requested(load, visible);
        }
    }

    /// Advance at most one activation and run any deactivations the slot allows.
    fn update_visibility(&mut self, world: &mut World, host: &mut StreamingHost<'_>, budget: &mut BudgetTracker) -> usize {
        let mut activated = false;
        let mut deactivated = 0;
        for i in 0..self.descriptors.len() {
            let (before, rest) = self.descriptors.split_at_mut(i);
            let Some((desc, after)) = rest.split_first_mut() else {
                break;
            };
            if !desc.is_loaded() {
                continue;
            }
            let package = desc.package().clone();

            if desc.requested_visible() && !desc.is_visible() {
                if activated || !self.slot.admits(&package) {
                    continue;
                }
                let fresh = self.slot.is_idle();
                let offset = if fresh {
                    desc.begin_activation_offset()
                } else {
                    desc.pending_offset()
                };
                let Some(content) = desc.content_mut() else {
                    continue;
                };
                if fresh {
                    content.set_visibility_request_pending(true);
                    self.slot.occupy(package.clone());
                    tracing::debug!(level = %package, "activation started");
                }
                let peers: Vec<&mut LevelContent> = before
                    .iter_mut()
                    .chain(after.iter_mut())
                    .filter(|d| d.is_visible())
                    .filter_map(|d| d.content_mut())
                    .collect();
                let mut ctx = ActivationContext {
                    world: &mut *world,
                    peers,
                    physics: &mut *host.physics,
                    net: &mut *host.net,
                    config: &self.config,
                    budget: &mut *budget,
                    observer: host
                        .observer
                        .as_deref_mut()
                        .map(|o| o as &mut dyn ActivationObserver),
                };
                let report = activation::advance(content, offset, &mut ctx);
                activated = true;
                if report.is_complete() {
                    desc.set_visible(true);
                    self.slot.release();
                    tracing::debug!(level = %package, "level visible");
                }
            } else if !desc.requested_visible() && desc.is_visible() {
                let Some(idle) = self.slot.idle() else {
                    continue;
                };
                let Some(content) = desc.content_mut() else {
                    continue;
                };
                let peers: Vec<&mut LevelContent> = before
                    .iter_mut()
                    .chain(after.iter_mut())
                    .filter(|d| d.is_visible())
                    .filter_map(|d| d.content_mut())
                    .collect();
                deactivation::deactivate(
                    content,
                    DeactivationContext {
                        world: &mut *world,
                        peers,
                        physics: &mut *host.physics,
                        net: &mut *host.net,
                    },
                    idle,
                );
                desc.set_visible(false);
                deactivated += 1;
            }
        }
        deactivated
    }

    fn update_unloads(&mut self) -> usize {
        let mut requested = 0;
        for desc in &mut self.descriptors {
            let keep = desc.requested_loaded();
            let visible = desc.is_visible();
            let Some(content) = desc.content_mut() else {
                continue;
            };
            if keep {
                self.gc.cancel_unload_request(content);
            } else if !visible && self.gc.request_unload(content) {
                requested += 1;
            }
        }
        requested
    }

    fn remove_finished(&mut self) {
        self.descriptors.retain(|d| {
            let done = d.is_requesting_removal() && !d.is_loaded() && !d.is_visible();
            if done {
                tracing::debug!(level = %d.package(), "streaming level removed");
            }
            !done
        });
    }

    /// Quarantine pending levels, run `collector`, and optionally verify nothing dangles.
    pub fn collect_garbage(
        &mut self,
        world: &mut World,
        collector: &mut dyn GarbageCollector,
        net: &mut dyn NetworkNotifier,
    ) -> CollectionStats {
        let _span = tracing::info_span!("stream_collect").entered();
        self.gc.prepare_for_collection(&mut self.descriptors, net);
        let condemned = self.gc.take_quarantined();
        let mut survivors: Vec<&mut LevelContent> = self
            .descriptors
            .iter_mut()
            .filter_map(|d| d.content_mut())
            .collect();
        let mut stats = collector.collect(world, &mut survivors, condemned);
        self.gc.record_collected(&stats.packages);
        if self.config.verify_after_collection {
            let survivors: Vec<&LevelContent> = survivors.iter().map(|l| &**l).collect();
            stats.dangling = self.gc.verify_after_collection(world, &survivors);
        }
        self.gc_requested = self.gc.pending_count() > 0;
        stats
    }

    /// Tick until no visibility change (and, in `Full` mode, no load) is outstanding.
    ///
    /// Runs unbounded ticks, flushing the loader between them and collecting
    /// when pending unloads gate a wanted load. Returns the number of iterations.
    pub fn flush(
        &mut self,
        world: &mut World,
        host: &mut StreamingHost<'_>,
        viewers: &[Vec3],
        mode: FlushMode,
    ) -> Result<usize, StreamError> {
        if self.frozen {
            tracing::debug!("flush skipped: streaming frozen");
            return Ok(0);
        }
        let _span = tracing::info_span!("stream_flush", ?mode).entered();
        let limit = self.config.max_flush_iterations;
        for iteration in 1..=limit {
            self.tick(world, host, viewers, TickBudget::Unbounded);
            if mode == FlushMode::Full {
                host.loader.flush_all();
                if self.has_gated_load() {
                    self.collect_garbage(world, &mut ReferenceSweeper, host.net);
                }
            }
            if !self.has_outstanding_work(mode) {
                self.tick(world, host, viewers, TickBudget::Unbounded);
                return Ok(iteration);
            }
        }
        tracing::warn!(iterations = limit, "streaming flush stalled");
        Err(StreamError::FlushStalled { iterations: limit })
    }

    fn has_gated_load(&self) -> bool {
        self.gc.pending_count() > 0
            && self
                .descriptors
                .iter()
                .any(|d| d.requested_loaded() && !d.is_loaded() && !d.has_load_request_pending())
    }

    fn has_outstanding_work(&self, mode: FlushMode) -> bool {
        !self.slot.is_idle()
            || self.descriptors.iter().any(|d| {
                let show = d.requested_visible() && d.is_loaded() && !d.is_visible();
                let hide = !d.requested_visible() && d.is_visible();
                let load = mode == FlushMode::Full
                    && d.requested_loaded()
                    && !d.is_loaded()
                    && d.load_failure().is_none();
                show || hide || load
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::CatalogLoader;
    use crate::notify::RecordingNotifier;
    use crate::physics::BodyRegistry;
    use crate::policy::{AlwaysLoaded, DistancePolicy, ScriptedPolicy};
    use levelflow_kernel::{ActivationStep, Actor, ActorKind, PackageContent};

    fn scripted(loaded: bool, visible: bool) -> Box<ScriptedPolicy> {
        Box::new(ScriptedPolicy {
            should_be_loaded: loaded,
            should_be_visible: visible,
        })
    }

    fn actors(prefix: &str, n: usize) -> Vec<Actor> {
        (0..n)
            .map(|i| Actor::new(format!("{prefix}{i}"), ActorKind::Generic))
            .collect()
    }

    fn began_world() -> World {
        let mut world = World::new("Persistent");
        world.begin_play();
        world
    }

    struct Rig {
        world: World,
        loader: CatalogLoader,
        physics: BodyRegistry,
        net: RecordingNotifier,
    }

    impl Rig {
        fn new(loader: CatalogLoader) -> Self {
            Self {
                world: began_world(),
                loader,
                physics: BodyRegistry::new(),
                net: RecordingNotifier::new(),
            }
        }

        fn tick(&mut self, s: &mut LevelStreamingScheduler, budget: TickBudget) -> StreamStats {
            self.loader.poll();
            let mut host = StreamingHost::new(&mut self.loader, &mut self.physics, &mut self.net);
            s.tick(&mut self.world, &mut host, &[], budget)
        }

        fn tick_observed(
            &mut self,
            s: &mut LevelStreamingScheduler,
            observer: &mut dyn ActivationObserver,
            budget: TickBudget,
        ) -> StreamStats {
            self.loader.poll();
            let mut host =
                StreamingHost::new(&mut self.loader, &mut self.physics, &mut self.net).with_observer(observer);
            s.tick(&mut self.world, &mut host, &[], budget)
        }

        fn collect(&mut self, s: &mut LevelStreamingScheduler) -> CollectionStats {
            s.collect_garbage(&mut self.world, &mut ReferenceSweeper, &mut self.net)
        }

        fn flush(&mut self, s: &mut LevelStreamingScheduler, viewers: &[Vec3]) -> Result<usize, StreamError> {
            let mut host = StreamingHost::new(&mut self.loader, &mut self.physics, &mut self.net);
            s.flush(&mut self.world, &mut host, viewers, FlushMode::Full)
        }
    }

    fn step_of(s: &LevelStreamingScheduler, name: &str) -> Option<ActivationStep> {
        s.descriptor(&name.into())
            .and_then(|d| d.content())
            .map(|c| c.step())
    }

    #[test]
    fn three_level_scenario_with_one_step_budget() {
        let mut rig = Rig::new(CatalogLoader::new().with_package(PackageContent::level("B", actors("b", 2))));
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(
            LevelDescriptor::new("A", scripted(true, true)).with_content(LevelContent::new("A", actors("a", 3))),
        )
        .unwrap();
        s.add_descriptor(LevelDescriptor::new("B", scripted(false, false))).unwrap();
        s.add_descriptor(
            LevelDescriptor::new("C", scripted(false, false)).with_content(LevelContent::new("C", actors("c", 2))),
        )
        .unwrap();

        for tick in 1..=5 {
            let stats = rig.tick(&mut s, TickBudget::steps(1));
            assert_eq!(stats.steps_this_tick, 1);
            assert_eq!(step_of(&s, "A"), ActivationStep::ORDER.get(tick).copied());
            assert!(!s.descriptor(&"B".into()).unwrap().is_loaded());
            assert!(s.gc().is_pending(&"C".into()));
        }
        assert_eq!(s.mid_activation(), Some(&PackageName::from("A")));
        assert!(s.gc_requested());

        let mut ticks = 5;
        while !s.descriptor(&"A".into()).unwrap().is_visible() {
            rig.tick(&mut s, TickBudget::steps(1));
            ticks += 1;
            assert!(ticks <= 10);
        }
        assert_eq!(ticks, 10);
        assert_eq!(step_of(&s, "A"), Some(ActivationStep::Complete));
        assert!(rig.loader.requests().is_empty());

        let collected = rig.collect(&mut s);
        assert_eq!(collected.packages, vec![PackageName::from("C")]);
        assert!(collected.dangling.is_empty());
        assert!(!s.descriptor(&"C".into()).unwrap().is_loaded());
        assert!(!rig.world.is_level_active(&"C".into()));
        assert!(rig.world.is_level_active(&"A".into()));

        // B loads once asked for, now that nothing is pending purge.
        s.set_scripted(&"B".into(), true, true).unwrap();
        rig.tick(&mut s, TickBudget::steps(1));
        assert_eq!(rig.loader.requests(), &[PackageName::from("B")]);
        rig.tick(&mut s, TickBudget::steps(1));
        assert!(s.descriptor(&"B".into()).unwrap().is_loaded());
    }

    #[test]
    fn steps_follow_fixed_order_without_interleaving() {
        #[derive(Default)]
        struct Log(Vec<(PackageName, ActivationStep)>);
        impl ActivationObserver for Log {
            fn step_completed(&mut self, level: &PackageName, step: ActivationStep) {
                self.0.push((level.clone(), step));
            }
        }

        let mut rig = Rig::new(CatalogLoader::new());
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        for name in ["North", "South"] {
            s.add_descriptor(
                LevelDescriptor::new(name, Box::new(AlwaysLoaded))
                    .with_content(LevelContent::new(name, actors(name, 4))),
            )
            .unwrap();
        }
        let mut log = Log::default();
        for _ in 0..40 {
            rig.tick_observed(&mut s, &mut log, TickBudget::steps(1));
        }
        let expected: Vec<ActivationStep> = ActivationStep::ORDER[1..].to_vec();
        let north: Vec<ActivationStep> = log.0[..10].iter().map(|(_, s)| *s).collect();
        let south: Vec<ActivationStep> = log.0[10..].iter().map(|(_, s)| *s).collect();
        assert!(log.0[..10].iter().all(|(l, _)| l.as_str() == "North"));
        assert_eq!(north, expected);
        assert_eq!(south, expected);
    }

    /// Deterministic generator for randomized invariant checks.
    struct SplitMix64(u64);

    impl SplitMix64 {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = self.0;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        }

        fn chance(&mut self, percent: u64) -> bool {
            self.next() % 100 < percent
        }
    }

    #[test]
    fn at_most_one_level_mid_activation() {
        for seed in 0..8u64 {
            let mut rng = SplitMix64(seed);
            let names: Vec<String> = (0..6).map(|i| format!("L{i}")).collect();
            let mut loader = CatalogLoader::new().with_latency(1 + (rng.next() % 3) as u32);
            for name in &names {
                loader.insert(PackageContent::level(name.as_str(), actors(name, 1 + (rng.next() % 5) as usize)));
            }
            let mut rig = Rig::new(loader);
            let mut s = LevelStreamingScheduler::new(StreamConfig::default());
            for name in &names {
                s.add_descriptor(LevelDescriptor::new(name.as_str(), scripted(false, false)))
                    .unwrap();
            }

            for _ in 0..300 {
                for name in &names {
                    if rng.chance(10) {
                        let loaded = rng.chance(60);
                        let visible = loaded && rng.chance(70);
                        s.set_scripted(&name.as_str().into(), loaded, visible).unwrap();
                    }
                }
                let budget = TickBudget::steps(1 + (rng.next() % 3) as u32);
                rig.tick(&mut s, budget);
                if rng.chance(15) {
                    let stats = rig.collect(&mut s);
                    assert!(stats.dangling.is_empty(), "seed {seed}: {:?}", stats.dangling);
                }

                let mid: Vec<&PackageName> = s
                    .descriptors()
                    .iter()
                    .filter(|d| {
                        d.content()
                            .is_some_and(|c| !matches!(c.step(), ActivationStep::NotStarted | ActivationStep::Complete))
                    })
                    .map(|d| d.package())
                    .collect();
                assert!(mid.len() <= 1, "seed {seed}: {mid:?}");
                assert_eq!(mid.first().copied(), s.mid_activation(), "seed {seed}");
            }
        }
    }

    #[test]
    fn activate_deactivate_collect_leaves_nothing_behind() {
        let target = Actor::new("switch", ActorKind::Pawn);
        let target_id = target.id;
        let mut rig = Rig::new(CatalogLoader::new().with_package(PackageContent::level("Vault", vec![target])));
        rig.world
            .persistent_mut()
            .push_actor(Actor::new("door", ActorKind::Generic).with_ref(target_id));
        let mut s = LevelStreamingScheduler::new(StreamConfig::unbounded());
        s.add_descriptor(LevelDescriptor::new("Vault", scripted(true, true))).unwrap();

        rig.flush(&mut s, &[]).unwrap();
        assert!(s.descriptor(&"Vault".into()).unwrap().is_visible());
        assert_eq!(rig.world.persistent().actors()[0].refs_into(&"Vault".into()), 1);
        assert_eq!(rig.world.pawns().len(), 1);

        s.set_scripted(&"Vault".into(), false, false).unwrap();
        let stats = rig.tick(&mut s, TickBudget::Unbounded);
        assert_eq!(stats.levels_deactivated_this_tick, 1);
        assert_eq!(stats.unloads_requested_this_tick, 1);

        let collected = rig.collect(&mut s);
        assert_eq!(collected.levels_freed, 1);
        assert_eq!(collected.actors_freed, 1);
        assert!(s.gc().verify_after_collection(&rig.world, &[]).is_empty());
        assert!(rig.world.persistent().actors()[0].cross_level_refs[0].resolved.is_none());
        assert!(rig.world.pawns().is_empty());
        assert!(!rig.world.is_level_active(&"Vault".into()));
        assert_eq!(rig.net.destroyed_count(), 1);
    }

    #[test]
    fn rerequest_before_collection_cancels_unload() {
        let mut rig = Rig::new(CatalogLoader::new());
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(
            LevelDescriptor::new("Attic", scripted(false, false)).with_content(LevelContent::new("Attic", actors("x", 2))),
        )
        .unwrap();

        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(s.gc().is_pending(&"Attic".into()));

        s.set_scripted(&"Attic".into(), true, false).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(!s.gc().is_pending(&"Attic".into()));

        let stats = rig.collect(&mut s);
        assert_eq!(stats.levels_freed, 0);
        let attic = s.descriptor(&"Attic".into()).unwrap();
        assert!(attic.is_loaded());
        assert!(!attic.content().unwrap().is_condemned());
    }

    #[test]
    fn missing_content_stalls_until_policy_changes() {
        let mut rig = Rig::new(CatalogLoader::new());
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(LevelDescriptor::new("Ghost", scripted(true, true))).unwrap();

        for _ in 0..4 {
            rig.tick(&mut s, TickBudget::Unbounded);
        }
        assert_eq!(rig.loader.requests().len(), 1);
        assert_eq!(s.stalled_levels(), vec![&PackageName::from("Ghost")]);

        s.set_scripted(&"Ghost".into(), false, false).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(s.stalled_levels().is_empty());

        s.set_scripted(&"Ghost".into(), true, true).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        assert_eq!(rig.loader.requests().len(), 2);
    }

    #[test]
    fn pending_purge_gates_new_loads_unless_blocking() {
        let mut rig = Rig::new(
            CatalogLoader::new()
                .with_package(PackageContent::level("Next", vec![]))
                .with_package(PackageContent::level("Urgent", vec![])),
        );
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(
            LevelDescriptor::new("Old", scripted(false, false)).with_content(LevelContent::new("Old", vec![])),
        )
        .unwrap();
        s.add_descriptor(LevelDescriptor::new("Next", scripted(false, false))).unwrap();
        let mut urgent = LevelDescriptor::new("Urgent", scripted(false, false));
        urgent.should_block_on_load = true;
        s.add_descriptor(urgent).unwrap();

        rig.tick(&mut s, TickBudget::Unbounded);
        s.set_scripted(&"Next".into(), true, true).unwrap();
        s.set_scripted(&"Urgent".into(), true, true).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);

        assert_eq!(rig.loader.requests(), &[PackageName::from("Urgent")]);
        assert!(s.block_on_load_requested());
        assert!(s.descriptor(&"Urgent".into()).unwrap().is_loaded());
        assert!(s.gc_requested());

        rig.collect(&mut s);
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(rig.loader.requests().contains(&PackageName::from("Next")));
    }

    #[test]
    fn distance_policy_follows_viewer() {
        let mut rig = Rig::new(CatalogLoader::new().with_package(PackageContent::level("Far", actors("f", 1))));
        let mut s = LevelStreamingScheduler::new(StreamConfig::unbounded());
        s.add_descriptor(LevelDescriptor::new(
            "Far",
            Box::new(DistancePolicy {
                origin: Vec3::new(1000.0, 0.0, 0.0),
                max_distance: 50.0,
            }),
        ))
        .unwrap();

        rig.flush(&mut s, &[]).unwrap();
        assert!(!s.descriptor(&"Far".into()).unwrap().is_loaded());

        rig.flush(&mut s, &[Vec3::new(990.0, 0.0, 0.0)]).unwrap();
        assert!(s.descriptor(&"Far".into()).unwrap().is_visible());

        rig.flush(&mut s, &[Vec3::ZERO]).unwrap();
        assert!(!s.descriptor(&"Far".into()).unwrap().is_visible());
    }

    #[test]
    fn removal_waits_for_unload() {
        let mut rig = Rig::new(CatalogLoader::new().with_package(PackageContent::level("Temp", vec![])));
        let mut s = LevelStreamingScheduler::new(StreamConfig::unbounded());
        s.add_descriptor(LevelDescriptor::new("Temp", Box::new(AlwaysLoaded))).unwrap();
        rig.flush(&mut s, &[]).unwrap();

        s.request_unload_and_removal(&"Temp".into()).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(s.descriptor(&"Temp".into()).is_some());
        rig.collect(&mut s);
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(s.descriptor(&"Temp".into()).is_none());
        assert!(matches!(
            s.request_unload_and_removal(&"Temp".into()),
            Err(StreamError::UnknownLevel(_))
        ));
    }

    #[test]
    fn initial_bring_up_flushes_loads() {
        let mut rig = Rig::new(
            CatalogLoader::new()
                .with_latency(5)
                .with_package(PackageContent::level("Start", vec![])),
        );
        rig.world = World::new("Fresh");
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(LevelDescriptor::new("Start", Box::new(AlwaysLoaded))).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(s.descriptor(&"Start".into()).unwrap().is_visible());
    }

    #[test]
    fn frozen_scheduler_ignores_ticks() {
        let mut rig = Rig::new(CatalogLoader::new().with_package(PackageContent::level("L", vec![])));
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(LevelDescriptor::new("L", Box::new(AlwaysLoaded))).unwrap();
        s.set_frozen(true);
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(rig.loader.requests().is_empty());
        s.set_frozen(false);
        rig.tick(&mut s, TickBudget::Unbounded);
        assert_eq!(rig.loader.requests().len(), 1);
    }

    #[test]
    fn stale_completion_is_quarantined() {
        let mut rig = Rig::new(
            CatalogLoader::new()
                .with_latency(2)
                .with_package(PackageContent::level("Gone", actors("g", 2))),
        );
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(LevelDescriptor::new("Gone", Box::new(AlwaysLoaded))).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        s.request_unload_and_removal(&"Gone".into()).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        assert!(s.descriptor(&"Gone".into()).is_none());

        rig.tick(&mut s, TickBudget::Unbounded);
        assert_eq!(s.gc().quarantined().len(), 1);
        assert!(s.gc_requested());
        let stats = rig.collect(&mut s);
        assert_eq!(stats.actors_freed, 2);
    }

    #[test]
    fn offset_change_moves_only_by_delta() {
        let mut rig = Rig::new(CatalogLoader::new());
        let mut s = LevelStreamingScheduler::new(StreamConfig::unbounded());
        s.add_descriptor(
            LevelDescriptor::new("Dock", scripted(true, true))
                .with_offset(Vec3::X * 10.0)
                .with_content(LevelContent::new("Dock", actors("d", 1))),
        )
        .unwrap();
        rig.flush(&mut s, &[]).unwrap();
        let pos = |s: &LevelStreamingScheduler| {
            let dock = s.descriptor(&"Dock".into()).unwrap();
            dock.content().unwrap().actors()[0].transform.position
        };
        assert_eq!(pos(&s), Vec3::X * 10.0);

        s.set_scripted(&"Dock".into(), true, false).unwrap();
        rig.flush(&mut s, &[]).unwrap();
        s.descriptor_mut(&"Dock".into()).unwrap().offset = Vec3::X * 12.0;
        s.set_scripted(&"Dock".into(), true, true).unwrap();
        rig.flush(&mut s, &[]).unwrap();
        assert_eq!(pos(&s), Vec3::X * 12.0);
    }

    #[test]
    fn reloaded_level_is_offset_again() {
        let mut rig = Rig::new(CatalogLoader::new().with_package(PackageContent::level("Dock", actors("d", 1))));
        let mut s = LevelStreamingScheduler::new(StreamConfig::unbounded());
        s.add_descriptor(LevelDescriptor::new("Dock", scripted(true, true)).with_offset(Vec3::X * 10.0))
            .unwrap();
        let pos = |s: &LevelStreamingScheduler| {
            let dock = s.descriptor(&"Dock".into()).unwrap();
            dock.content().unwrap().actors()[0].transform.position
        };

        rig.flush(&mut s, &[]).unwrap();
        assert_eq!(pos(&s), Vec3::X * 10.0);

        s.set_scripted(&"Dock".into(), false, false).unwrap();
        rig.tick(&mut s, TickBudget::Unbounded);
        assert_eq!(rig.collect(&mut s).levels_freed, 1);
        assert!(!s.descriptor(&"Dock".into()).unwrap().is_loaded());

        s.set_scripted(&"Dock".into(), true, true).unwrap();
        rig.flush(&mut s, &[]).unwrap();
        assert_eq!(pos(&s), Vec3::X * 10.0);
    }

    #[test]
    fn duplicate_descriptor_rejected() {
        let mut s = LevelStreamingScheduler::new(StreamConfig::default());
        s.add_descriptor(LevelDescriptor::new("L", Box::new(AlwaysLoaded))).unwrap();
        assert!(matches!(
            s.add_descriptor(LevelDescriptor::new("L", Box::new(AlwaysLoaded))),
            Err(StreamError::DuplicateLevel(_))
        ));
        assert!(matches!(
            s.set_scripted(&"Nope".into(), true, true),
            Err(StreamError::UnknownLevel(_))
        ));
    }
}
