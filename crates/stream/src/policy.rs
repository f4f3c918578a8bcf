use glam::Vec3;
use levelflow_kernel::PolicySpec;
use std::fmt;

/// Decides, each tick, whether a streaming level should be loaded and visible.
///
/// `viewers` is never empty; the scheduler substitutes the origin when no
/// viewer positions were supplied.
pub trait StreamingPolicy: fmt::Debug + Send {
    fn should_be_loaded(&self, viewers: &[Vec3]) -> bool;

    /// Only consulted when the level should be loaded.
    fn should_be_visible(&self, viewers: &[Vec3]) -> bool {
        self.should_be_loaded(viewers)
    }

    /// Set event-driven request flags. Returns false for policies that ignore them.
    fn set_requested(&mut self, _loaded: bool, _visible: bool) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLoaded;

impl StreamingPolicy for AlwaysLoaded {
    fn should_be_loaded(&self, _viewers: &[Vec3]) -> bool {
        true
    }
}

/// Loaded (and visible) while any viewer is within `max_distance` of `origin`.
#[derive(Debug, Clone, Copy)]
pub struct DistancePolicy {
    pub origin: Vec3,
    pub max_distance: f32,
}

impl StreamingPolicy for DistancePolicy {
    fn should_be_loaded(&self, viewers: &[Vec3]) -> bool {
        viewers
            .iter()
            .any(|v| v.distance(self.origin) <= self.max_distance)
    }
}

/// Flags toggled by gameplay scripting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedPolicy {
    pub should_be_loaded: bool,
    pub should_be_visible: bool,
}

impl StreamingPolicy for ScriptedPolicy {
    fn should_be_loaded(&self, _viewers: &[Vec3]) -> bool {
        self.should_be_loaded
    }

    fn should_be_visible(&self, _viewers: &[Vec3]) -> bool {
        self.should_be_visible
    }

    fn set_requested(&mut self, loaded: bool, visible: bool) -> bool {
        self.should_be_loaded = loaded;
        self.should_be_visible = visible;
        true
    }
}

/// A world's own root level. It is part of the world, so streaming never touches it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentPolicy;

impl StreamingPolicy for PersistentPolicy {
    fn should_be_loaded(&self, _viewers: &[Vec3]) -> bool {
        false
    }
}

/// Build the runtime policy for an authored spec.
pub fn from_spec(spec: &PolicySpec) -> Box<dyn StreamingPolicy> {
    match *spec {
        PolicySpec::AlwaysLoaded => Box::new(AlwaysLoaded),
        PolicySpec::Distance {
            origin,
            max_distance,
        } => Box::new(DistancePolicy {
            origin,
            max_distance,
        }),
        PolicySpec::Scripted {
            should_be_loaded,
            should_be_visible,
        } => Box::new(ScriptedPolicy {
            should_be_loaded,
            should_be_visible,
        }),
        PolicySpec::Persistent => Box::new(PersistentPolicy),
    }
}
