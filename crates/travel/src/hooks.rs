use levelflow_common::{EntityId, PackageName};
use levelflow_kernel::{Actor, ActorKind, World};
use std::collections::BTreeSet;

use crate::url::TravelUrl;

/// Actors explicitly marked to survive a world swap. Built fresh for every commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainedActorSet {
    ids: BTreeSet<EntityId>,
}

impl RetainedActorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: EntityId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.ids.iter().copied()
    }
}

/// Game-side callbacks around a seamless travel.
///
/// Every method has a no-op default so hosts only override what they need.
pub trait TravelHooks {
    /// Add actors the game mode and local players want carried over.
    /// `to_transition` is true while heading into the transition world.
    fn seamless_travel_actor_list(&mut self, _to_transition: bool, _world: &World, _keep: &mut RetainedActorSet) {}

    /// Spawn the destination's game mode on the final hop.
    fn create_game_mode(&mut self, _world: &World, _url: &TravelUrl) -> Option<Actor> {
        None
    }

    /// Sent to each local player once a world has been swapped in.
    fn notify_loaded_world(&mut self, _world: &PackageName, _is_final: bool) {}

    /// The final destination is live and carried-over players may be handled.
    fn post_seamless_travel(&mut self, _world: &World) {}
}

/// Hooks that keep a list of named actors, spawn a plain game mode and record callbacks.
#[derive(Debug, Default)]
pub struct StandardHooks {
    /// Actor names to carry over in addition to the built-in rules.
    pub keep_named: Vec<String>,
    pub loaded_worlds: Vec<(PackageName, bool)>,
    pub completed: Vec<PackageName>,
}

impl StandardHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keeping(mut self, name: impl Into<String>) -> Self {
        self.keep_named.push(name.into());
        self
    }
}

impl TravelHooks for StandardHooks {
    fn seamless_travel_actor_list(&mut self, _to_transition: bool, world: &World, keep: &mut RetainedActorSet) {
        for actor in world.persistent().actors() {
            if self.keep_named.iter().any(|n| n == &actor.name) {
                keep.insert(actor.id);
            }
        }
    }

    fn create_game_mode(&mut self, world: &World, url: &TravelUrl) -> Option<Actor> {
        let name = url.option("Game").filter(|g| !g.is_empty()).unwrap_or("GameMode");
        tracing::debug!(world = %world.name(), game = name, "spawning game mode");
        Some(Actor::new(name, ActorKind::GameMode))
    }

    fn notify_loaded_world(&mut self, world: &PackageName, is_final: bool) {
        self.loaded_worlds.push((world.clone(), is_final));
    }

    fn post_seamless_travel(&mut self, world: &World) {
        self.completed.push(world.name().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_hooks_keep_by_name() {
        let mut world = World::new("W");
        let torch = Actor::new("torch", ActorKind::Generic);
        let torch_id = torch.id;
        world.persistent_mut().push_actor(torch);
        world.persistent_mut().push_actor(Actor::new("crate", ActorKind::Generic));

        let mut hooks = StandardHooks::new().keeping("torch");
        let mut keep = RetainedActorSet::new();
        hooks.seamless_travel_actor_list(true, &world, &mut keep);
        assert_eq!(keep.len(), 1);
        assert!(keep.contains(torch_id));
    }

    #[test]
    fn game_mode_name_comes_from_url() {
        let mut hooks = StandardHooks::new();
        let world = World::new("W");
        let url = TravelUrl::parse("W?Game=Duel").unwrap();
        let game = hooks.create_game_mode(&world, &url).unwrap();
        assert_eq!(game.name, "Duel");
        assert_eq!(game.kind, ActorKind::GameMode);
    }
}
