use levelflow_kernel::{LevelContent, World, crossref};

use crate::activation::IdleProof;
use crate::notify::NetworkNotifier;
use crate::physics::PhysicsHost;

pub struct DeactivationContext<'a> {
    pub world: &'a mut World,
    /// Content of the other visible streamed levels.
    pub peers: Vec<&'a mut LevelContent>,
    pub physics: &'a mut dyn PhysicsHost,
    pub net: &'a mut dyn NetworkNotifier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeactivationReport {
    /// References held by other levels that pointed into this one.
    pub inbound_refs_cleared: usize,
    /// References held by this level's actors.
    pub outbound_refs_cleared: usize,
    pub registry_entries_removed: usize,
    pub sequences_detached: usize,
}

/// Take a visible level out of the world in one go.
///
/// Requires an [`IdleProof`]: deactivation never interleaves with another
/// level's activation. Leaves the level at `NotStarted`, ready to be
/// activated again or handed to the GC queue.
pub fn deactivate(level: &mut LevelContent, ctx: DeactivationContext<'_>, _idle: IdleProof) -> DeactivationReport {
    let DeactivationContext {
        world,
        mut peers,
        physics,
        net,
    } = ctx;
    let package = level.package().clone();
    let _span = tracing::debug_span!("deactivate", level = %package).entered();

    let mut inbound = crossref::clear_refs_into(&mut peers, &package);
    inbound += crossref::clear_refs_into(&mut [world.persistent_mut()], &package);

    let mut outbound = 0;
    for actor in level.actors_mut() {
        for r in &mut actor.cross_level_refs {
            if r.resolved.take().is_some() {
                outbound += 1;
            }
        }
    }

    let sequences_detached = world.root_sequence_mut().detach_level(&package);
    for seq in level.sequences_mut() {
        seq.parent = None;
        seq.begun = false;
    }

    physics.tear_down_bodies(level);
    let registry_entries_removed = world.unregister_level(&package);
    for actor in level.actors_mut() {
        actor.state.script_initialized = false;
        actor.state.components_attached = false;
    }

    world.remove_level(&package);
    level.reset_activation();
    net.notify_level_hidden(&package);

    let report = DeactivationReport {
        inbound_refs_cleared: inbound,
        outbound_refs_cleared: outbound,
        registry_entries_removed,
        sequences_detached,
    };
    tracing::debug!(level = %package, ?report, "level deactivated");
    report
}
