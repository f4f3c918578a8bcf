//! Incremental level activation.
//!
//! A loaded level becomes part of the live world through a fixed sequence of
//! [`ActivationStep`]s. [`advance`] runs steps until the tick budget is spent;
//! incremental steps run in sub-batches and resume from the level's cursor on
//! the next visit. Only one level may be mid-activation at a time: the
//! scheduler enforces that with an [`ActivationSlot`], which `advance` never
//! sees.

use glam::Vec3;
use levelflow_common::PackageName;
use levelflow_kernel::{ActivationStep, Actor, LevelContent, World, crossref};
use std::time::Instant;

use crate::budget::{BudgetTracker, StreamConfig};
use crate::notify::NetworkNotifier;
use crate::physics::PhysicsHost;

/// Offsets shorter than this are treated as zero.
const OFFSET_EPSILON: f32 = 1e-4;

/// Hooks invoked while a level activates. Both default to no-ops.
pub trait ActivationObserver {
    fn step_completed(&mut self, _level: &PackageName, _step: ActivationStep) {}

    /// BeginPlay routed on `actor`. `is_startup` mirrors [`World::is_startup`].
    fn begin_play(&mut self, _level: &PackageName, _actor: &Actor, _is_startup: bool) {}
}

/// Everything a step needs besides the level itself.
pub struct ActivationContext<'a> {
    pub world: &'a mut World,
    /// Content of the other visible streamed levels, for cross-level fixup.
    pub peers: Vec<&'a mut LevelContent>,
    pub physics: &'a mut dyn PhysicsHost,
    pub net: &'a mut dyn NetworkNotifier,
    pub config: &'a StreamConfig,
    pub budget: &'a mut BudgetTracker,
    pub observer: Option<&'a mut dyn ActivationObserver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationProgress {
    /// Budget ran out. `step` is the last step that finished.
    Deferred { step: ActivationStep },
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceReport {
    pub progress: ActivationProgress,
    /// Steps that finished during this call, in order.
    pub steps: Vec<ActivationStep>,
}

impl AdvanceReport {
    pub fn is_complete(&self) -> bool {
        self.progress == ActivationProgress::Complete
    }
}

/// Run activation steps on `level` until it completes or the budget is spent.
///
/// The first pending step always runs, so every visit makes progress.
/// `offset_delta` is the translation still to be applied to the level's actors.
pub fn advance(level: &mut LevelContent, offset_delta: Vec3, ctx: &mut ActivationContext<'_>) -> AdvanceReport {
    let package = level.package().clone();
    let _span = tracing::debug_span!("activate", level = %package).entered();
    let mut steps = Vec::new();

    loop {
        let Some(next) = level.step().next() else {
            return AdvanceReport {
                progress: ActivationProgress::Complete,
                steps,
            };
        };

        let started = Instant::now();
        let finished = run_step(next, level, offset_delta, ctx);
        let took = started.elapsed();
        if took > ctx.config.slow_step_warning() {
            tracing::warn!(level = %package, step = %next, ?took, "slow activation step");
        }

        if !finished {
            tracing::trace!(level = %package, step = %next, cursor = level.cursor(), "sub-batch deferred");
            return AdvanceReport {
                progress: ActivationProgress::Deferred { step: level.step() },
                steps,
            };
        }

        level.advance_step();
        ctx.budget.record_step();
        steps.push(next);
        if let Some(observer) = ctx.observer.as_deref_mut() {
            observer.step_completed(&package, next);
        }
        tracing::debug!(level = %package, step = %next, "activation step done");

        if next.is_complete() {
            return AdvanceReport {
                progress: ActivationProgress::Complete,
                steps,
            };
        }
        if ctx.budget.is_exceeded() {
            return AdvanceReport {
                progress: ActivationProgress::Deferred { step: next },
                steps,
            };
        }
    }
}

/// Execute one step (or as many of its sub-batches as time allows). Returns true when done.
fn run_step(step: ActivationStep, level: &mut LevelContent, offset: Vec3, ctx: &mut ActivationContext<'_>) -> bool {
    match step {
        ActivationStep::NotStarted => true,
        ActivationStep::ActorsRepositioned => {
            ctx.world.add_level(level.package());
            if offset.length() > OFFSET_EPSILON {
                for actor in level.actors_mut() {
                    actor.transform.position += offset;
                }
                level.mark_package_dirty();
            }
            true
        }
        ActivationStep::ComponentsAttached => {
            let batch = ctx.config.component_batch;
            loop {
                let start = level.cursor();
                let end = batch_end(start, batch, level.actor_count());
                for actor in &mut level.actors_mut()[start..end] {
                    actor.state.components_attached = true;
                }
                level.set_cursor(end);
                if end == level.actor_count() {
                    return true;
                }
                if ctx.budget.time_exceeded() {
                    return false;
                }
            }
        }
        ActivationStep::PhysicsBspBuilt => {
            ctx.physics.build_static_collision(level);
            true
        }
        ActivationStep::PhysicsActorsInitialized => loop {
            if ctx.physics.initialize_bodies_incremental(level, ctx.config.physics_batch) {
                return true;
            }
            if ctx.budget.time_exceeded() {
                return false;
            }
        },
        ActivationStep::ActorsInitialized => {
            let package = level.package().clone();
            for actor in level.actors_mut() {
                actor.state.script_initialized = true;
                ctx.world.register_actor(&package, actor);
            }
            true
        }
        ActivationStep::BeginPlayRouted => {
            let package = level.package().clone();
            ctx.world.set_startup(true);
            for actor in level.actors_mut() {
                if actor.state.has_begun_play {
                    continue;
                }
                actor.state.has_begun_play = true;
                if let Some(observer) = ctx.observer.as_deref_mut() {
                    observer.begin_play(&package, actor, ctx.world.is_startup());
                }
            }
            ctx.world.set_startup(false);
            true
        }
        ActivationStep::CrossLevelRefsFixed => {
            let mut levels: Vec<&mut LevelContent> = Vec::with_capacity(ctx.peers.len() + 2);
            levels.push(ctx.world.persistent_mut());
            levels.extend(ctx.peers.iter_mut().map(|p| &mut **p));
            levels.push(level);
            let report = crossref::resolve_refs(&mut levels, ctx.config.cross_level_table_cap);
            if report.unmatched > 0 {
                tracing::debug!(unmatched = report.unmatched, "cross-level references left unresolved");
            }
            true
        }
        ActivationStep::ScriptsBegun => {
            let package = level.package().clone();
            let root = ctx.world.root_sequence().name.clone();
            let begin = !ctx.config.disallow_sequence_begin_play;
            for seq in level.sequences_mut() {
                seq.parent = Some(root.clone());
                ctx.world.root_sequence_mut().attach(&package, &seq.name);
                if begin {
                    seq.begun = true;
                }
            }
            true
        }
        ActivationStep::Sorted => {
            level.sort_actor_list();
            true
        }
        ActivationStep::Complete => {
            level.set_visibility_request_pending(false);
            ctx.net.notify_level_visible(level.package());
            true
        }
    }
}

fn batch_end(start: usize, batch: usize, len: usize) -> usize {
    if batch == 0 {
        len
    } else {
        start.saturating_add(batch).min(len)
    }
}

/// Proof that no level is mid-activation. Only the scheduler's own slot hands these out.
#[derive(Debug)]
pub struct IdleProof {
    _private: (),
}

/// The scheduler's mid-activation marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActivationSlot {
    #[default]
    Idle,
    Busy(PackageName),
}

impl ActivationSlot {
    pub(crate) fn idle(&self) -> Option<IdleProof> {
        matches!(self, Self::Idle).then_some(IdleProof { _private: () })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether `package` may advance: the slot is free or already held by it.
    pub fn admits(&self, package: &PackageName) -> bool {
        match self {
            Self::Idle => true,
            Self::Busy(held) => held == package,
        }
    }

    pub fn busy_with(&self) -> Option<&PackageName> {
        match self {
            Self::Idle => None,
            Self::Busy(held) => Some(held),
        }
    }

    pub(crate) fn occupy(&mut self, package: PackageName) {
        *self = Self::Busy(package);
    }

    pub(crate) fn release(&mut self) {
        *self = Self::Idle;
    }
}
