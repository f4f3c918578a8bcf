use levelflow_common::{EntityId, PackageName};

/// Network boundary notified as levels and worlds come and go.
pub trait NetworkNotifier {
    /// A level finished activating; peers should confirm they see it too.
    fn notify_level_visible(&mut self, package: &PackageName);
    fn notify_level_hidden(&mut self, package: &PackageName);
    fn notify_world_swapped(&mut self, world: &PackageName);
    /// An actor was condemned; close any channel replicating it.
    fn notify_actor_destroyed(&mut self, actor: EntityId);
}

/// Notifier for standalone simulations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl NetworkNotifier for NullNotifier {
    fn notify_level_visible(&mut self, _package: &PackageName) {}
    fn notify_level_hidden(&mut self, _package: &PackageName) {}
    fn notify_world_swapped(&mut self, _world: &PackageName) {}
    fn notify_actor_destroyed(&mut self, _actor: EntityId) {}
}

/// A single notification, as recorded by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetNotice {
    LevelVisible(PackageName),
    LevelHidden(PackageName),
    WorldSwapped(PackageName),
    ActorDestroyed(EntityId),
}

/// Keeps every notification in order. Handy for tooling and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    pub notices: Vec<NetNotice>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Vec<&PackageName> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                NetNotice::LevelVisible(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn hidden(&self) -> Vec<&PackageName> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                NetNotice::LevelHidden(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed_count(&self) -> usize {
        self.notices
            .iter()
            .filter(|n| matches!(n, NetNotice::ActorDestroyed(_)))
            .count()
    }
}

impl NetworkNotifier for RecordingNotifier {
    fn notify_level_visible(&mut self, package: &PackageName) {
        self.notices.push(NetNotice::LevelVisible(package.clone()));
    }

    fn notify_level_hidden(&mut self, package: &PackageName) {
        self.notices.push(NetNotice::LevelHidden(package.clone()));
    }

    fn notify_world_swapped(&mut self, world: &PackageName) {
        self.notices.push(NetNotice::WorldSwapped(world.clone()));
    }

    fn notify_actor_destroyed(&mut self, actor: EntityId) {
        self.notices.push(NetNotice::ActorDestroyed(actor));
    }
}
