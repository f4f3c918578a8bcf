//! Deferred reclamation of unloaded levels.
//!
//! A level that wants to unload is first recorded as pending. Right before a
//! collection pass its content is taken from the descriptor, condemned and
//! quarantined; the collector then nulls every surviving reference into it and
//! frees it. An optional verification pass scans for anything left pointing
//! at a collected package.

use levelflow_common::{EntityId, PackageName};
use levelflow_kernel::{LevelContent, World};
use std::collections::BTreeSet;

use crate::descriptor::LevelDescriptor;
use crate::notify::NetworkNotifier;

/// Something still pointing into a collected package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DanglingRef {
    ActorRef {
        holder: EntityId,
        target: EntityId,
        package: PackageName,
    },
    Registry {
        id: EntityId,
        package: PackageName,
    },
    ActiveLevel(PackageName),
    Sequence {
        package: PackageName,
        name: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub levels_freed: usize,
    pub actors_freed: usize,
    pub refs_nulled: usize,
    pub packages: Vec<PackageName>,
    /// Filled by the verification pass when it runs.
    pub dangling: Vec<DanglingRef>,
}

/// A collection pass over condemned content.
pub trait GarbageCollector {
    /// Null every reference `world` and `survivors` hold into `condemned`, then free it.
    fn collect(
        &mut self,
        world: &mut World,
        survivors: &mut [&mut LevelContent],
        condemned: Vec<LevelContent>,
    ) -> CollectionStats;
}

/// Mark-free collector: sweeps references by actor id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceSweeper;

impl GarbageCollector for ReferenceSweeper {
    fn collect(
        &mut self,
        world: &mut World,
        survivors: &mut [&mut LevelContent],
        condemned: Vec<LevelContent>,
    ) -> CollectionStats {
        let mut stats = CollectionStats::default();
        if condemned.is_empty() {
            return stats;
        }

        let doomed: BTreeSet<EntityId> = condemned
            .iter()
            .flat_map(|l| l.actors().iter().map(|a| a.id))
            .collect();
        // A package may be live again under a fresh load; leave that copy alone.
        let mut live: BTreeSet<PackageName> = survivors.iter().map(|l| l.package().clone()).collect();
        live.insert(world.name().clone());
        let packages: BTreeSet<&PackageName> = condemned
            .iter()
            .map(|l| l.package())
            .filter(|p| !live.contains(*p))
            .collect();

        let persistent = world.persistent_mut();
        for level in survivors.iter_mut().map(|l| &mut **l).chain(std::iter::once(persistent)) {
            for actor in level.actors_mut() {
                for r in &mut actor.cross_level_refs {
                    let stale = r
                        .resolved
                        .as_ref()
                        .is_some_and(|p| !live.contains(p) && (packages.contains(p) || doomed.contains(&r.target)));
                    if stale {
                        r.resolved = None;
                        stats.refs_nulled += 1;
                    }
                }
            }
        }

        let unregistered: Vec<EntityId> = world
            .registered_ids()
            .filter(|(id, entry)| doomed.contains(*id) && !live.contains(&entry.level))
            .map(|(id, _)| *id)
            .collect();
        for id in unregistered {
            world.unregister(id);
        }
        for package in &packages {
            world.root_sequence_mut().detach_level(package);
            world.remove_level(package);
        }

        stats.levels_freed = condemned.len();
        stats.actors_freed = doomed.len();
        stats.packages = condemned.iter().map(|l| l.package().clone()).collect();
        tracing::debug!(
            levels = stats.levels_freed,
            actors = stats.actors_freed,
            refs = stats.refs_nulled,
            "collected condemned levels"
        );
        stats
    }
}

/// Levels waiting to be reclaimed.
#[derive(Debug, Default)]
pub struct GcDeferralQueue {
    pending: Vec<PackageName>,
    quarantined: Vec<LevelContent>,
    last_collected: Vec<PackageName>,
}

impl GcDeferralQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `content` wants to be freed. Returns false if already pending.
    pub fn request_unload(&mut self, content: &mut LevelContent) -> bool {
        if content.unload_request_pending() {
            return false;
        }
        content.set_unload_request_pending(true);
        self.pending.push(content.package().clone());
        tracing::debug!(level = %content.package(), "unload requested");
        true
    }

    /// Undo [`request_unload`](Self::request_unload). Idempotent; returns whether anything changed.
    pub fn cancel_unload_request(&mut self, content: &mut LevelContent) -> bool {
        if !content.unload_request_pending() {
            return false;
        }
        content.set_unload_request_pending(false);
        self.pending.retain(|p| p != content.package());
        tracing::debug!(level = %content.package(), "unload request cancelled");
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, package: &PackageName) -> bool {
        self.pending.contains(package)
    }

    pub fn pending(&self) -> &[PackageName] {
        &self.pending
    }

    pub fn quarantined(&self) -> &[LevelContent] {
        &self.quarantined
    }

    /// Condemn `content` and hold it for the next collection.
    pub fn quarantine(&mut self, mut content: LevelContent, net: &mut dyn NetworkNotifier) {
        for actor in content.actors() {
            net.notify_actor_destroyed(actor.id);
        }
        content.condemn();
        tracing::debug!(level = %content.package(), actors = content.actor_count(), "quarantined");
        self.quarantined.push(content);
    }

    /// Move every pending level's content into quarantine. Call immediately before collecting.
    ///
    /// Content that is visible or mid-activation stays put and remains pending.
    pub fn prepare_for_collection(
        &mut self,
        descriptors: &mut [LevelDescriptor],
        net: &mut dyn NetworkNotifier,
    ) -> usize {
        let mut prepared = 0;
        let pending = std::mem::take(&mut self.pending);
        for package in pending {
            let Some(desc) = descriptors.iter_mut().find(|d| d.package() == &package) else {
                continue;
            };
            let busy = desc.is_visible() || desc.has_visibility_request_pending();
            if busy {
                self.pending.push(package);
                continue;
            }
            let Some(mut content) = desc.take_content() else {
                continue;
            };
            content.set_unload_request_pending(false);
            self.quarantine(content, net);
            prepared += 1;
        }
        prepared
    }

    pub fn take_quarantined(&mut self) -> Vec<LevelContent> {
        std::mem::take(&mut self.quarantined)
    }

    pub(crate) fn record_collected(&mut self, packages: &[PackageName]) {
        self.last_collected = packages.to_vec();
    }

    pub fn last_collected(&self) -> &[PackageName] {
        &self.last_collected
    }

    /// Scan `world` and `survivors` for anything still pointing at a package freed by the last pass.
    ///
    /// Packages that were collected but are live again among `survivors` are ignored.
    pub fn verify_after_collection(&self, world: &World, survivors: &[&LevelContent]) -> Vec<DanglingRef> {
        let mut live: BTreeSet<&PackageName> = survivors.iter().map(|l| l.package()).collect();
        live.insert(world.name());
        let gone: BTreeSet<&PackageName> = self
            .last_collected
            .iter()
            .filter(|p| !live.contains(p))
            .collect();
        let mut dangling = Vec::new();
        if gone.is_empty() {
            return dangling;
        }

        for level in survivors.iter().copied().chain(std::iter::once(world.persistent())) {
            for actor in level.actors() {
                for r in &actor.cross_level_refs {
                    if let Some(package) = r.resolved.as_ref().filter(|p| gone.contains(p)) {
                        dangling.push(DanglingRef::ActorRef {
                            holder: actor.id,
                            target: r.target,
                            package: package.clone(),
                        });
                    }
                }
            }
        }
        for (id, entry) in world.registered_ids() {
            if gone.contains(&entry.level) {
                dangling.push(DanglingRef::Registry {
                    id: *id,
                    package: entry.level.clone(),
                });
            }
        }
        for package in world.active_levels() {
            if gone.contains(package) {
                dangling.push(DanglingRef::ActiveLevel(package.clone()));
            }
        }
        for (package, name) in &world.root_sequence().nested {
            if gone.contains(package) {
                dangling.push(DanglingRef::Sequence {
                    package: package.clone(),
                    name: name.clone(),
                });
            }
        }

        for d in &dangling {
            tracing::error!(?d, "reference survived collection");
        }
        dangling
    }
}
