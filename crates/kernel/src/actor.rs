use glam::Vec3;
use levelflow_common::{EntityId, PackageName, Transform};
use serde::{Deserialize, Serialize};

/// Network role of an actor on this machine. Ordered from least to most control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    None,
    SimulatedProxy,
    AutonomousProxy,
    #[default]
    Authority,
}

/// Category of an actor, used to maintain the world's typed registries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActorKind {
    #[default]
    Generic,
    Controller {
        #[serde(default)]
        is_player: bool,
    },
    Pawn,
    GameMode,
}

/// A reference from one actor to another, possibly living in a different level.
///
/// `resolved` names the level the referent was found in; `None` means the
/// referent is not currently live (never resolved, or its level was removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub target: EntityId,
    #[serde(default, skip_serializing)]
    pub resolved: Option<PackageName>,
}

impl ActorRef {
    pub fn to(target: EntityId) -> Self {
        Self {
            target,
            resolved: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

/// Transient lifecycle state. Never serialized with a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorState {
    pub components_attached: bool,
    pub physics_initialized: bool,
    pub script_initialized: bool,
    pub has_begun_play: bool,
    pub pending_kill: bool,
    pub force_floor_check: bool,
}

/// An entity living in a level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: ActorKind,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub always_relevant: bool,
    /// Placed actors that may never be destroyed at runtime.
    #[serde(default)]
    pub no_delete: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub cross_level_refs: Vec<ActorRef>,
    #[serde(skip)]
    pub state: ActorState,
}

impl Actor {
    pub fn new(name: impl Into<String>, kind: ActorKind) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            kind,
            transform: Transform::default(),
            is_static: false,
            always_relevant: false,
            no_delete: false,
            role: Role::Authority,
            cross_level_refs: Vec::new(),
            state: ActorState::default(),
        }
    }

    /// Static level geometry or placed decoration.
    pub fn static_mesh(name: impl Into<String>, position: Vec3) -> Self {
        Self {
            is_static: true,
            no_delete: true,
            transform: Transform::from_position(position),
            ..Self::new(name, ActorKind::Generic)
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_ref(mut self, target: EntityId) -> Self {
        self.cross_level_refs.push(ActorRef::to(target));
        self
    }

    pub fn is_controller(&self) -> bool {
        matches!(self.kind, ActorKind::Controller { .. })
    }

    pub fn is_player_controller(&self) -> bool {
        matches!(self.kind, ActorKind::Controller { is_player: true })
    }

    pub fn is_pawn(&self) -> bool {
        matches!(self.kind, ActorKind::Pawn)
    }

    pub fn has_cross_level_refs(&self) -> bool {
        !self.cross_level_refs.is_empty()
    }

    /// Actors that can be carried into another world.
    pub fn is_dynamic(&self) -> bool {
        !self.is_static && !self.no_delete
    }

    /// Number of references resolved into `level`.
    pub fn refs_into(&self, level: &PackageName) -> usize {
        self.cross_level_refs
            .iter()
            .filter(|r| r.resolved.as_ref() == Some(level))
            .count()
    }
}
