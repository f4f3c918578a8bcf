use levelflow_common::{EntityId, PackageName};
use levelflow_kernel::LevelContent;
use std::collections::{BTreeMap, BTreeSet};

/// Physics engine boundary used by activation and deactivation.
pub trait PhysicsHost {
    /// Build static collision for the level's static geometry. One-shot.
    fn build_static_collision(&mut self, level: &mut LevelContent);

    /// Create bodies for up to `batch_size` actors (0 = all) starting at the
    /// level's cursor. Returns true once every actor has been processed.
    fn initialize_bodies_incremental(&mut self, level: &mut LevelContent, batch_size: usize) -> bool;

    /// Destroy static collision and every body owned by the level.
    fn tear_down_bodies(&mut self, level: &mut LevelContent);
}

/// Bookkeeping physics host: tracks which bodies exist per level.
#[derive(Debug, Default)]
pub struct BodyRegistry {
    bodies: BTreeMap<PackageName, BTreeSet<EntityId>>,
    static_collision: BTreeSet<PackageName>,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body_count(&self, level: &PackageName) -> usize {
        self.bodies.get(level).map_or(0, |b| b.len())
    }

    pub fn has_static_collision(&self, level: &PackageName) -> bool {
        self.static_collision.contains(level)
    }

    pub fn total_bodies(&self) -> usize {
        self.bodies.values().map(|b| b.len()).sum()
    }
}

impl PhysicsHost for BodyRegistry {
    fn build_static_collision(&mut self, level: &mut LevelContent) {
        self.static_collision.insert(level.package().clone());
        level.set_bsp_collision(true);
    }

    fn initialize_bodies_incremental(&mut self, level: &mut LevelContent, batch_size: usize) -> bool {
        let start = level.cursor();
        let len = level.actor_count();
        let end = if batch_size == 0 {
            len
        } else {
            (start + batch_size).min(len)
        };
        let package = level.package().clone();
        let bodies = self.bodies.entry(package).or_default();
        for actor in &mut level.actors_mut()[start..end] {
            if !actor.is_static {
                bodies.insert(actor.id);
            }
            actor.state.physics_initialized = true;
        }
        level.set_cursor(end);
        end == len
    }

    fn tear_down_bodies(&mut self, level: &mut LevelContent) {
        self.static_collision.remove(level.package());
        self.bodies.remove(level.package());
        level.set_bsp_collision(false);
        for actor in level.actors_mut() {
            actor.state.physics_initialized = false;
        }
    }
}
