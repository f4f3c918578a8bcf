use glam::Vec3;
use levelflow_common::{Checksum, PackageGuid, PackageName};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::level::{LevelContent, Sequence};

/// What a package holds. Only `World` and `Level` packages can be streamed or travelled to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    World,
    #[default]
    Level,
    Asset,
}

/// Streaming policy as authored in a world package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    /// Always loaded and visible.
    AlwaysLoaded,
    /// Loaded while any viewer is within `max_distance` of `origin`.
    Distance { origin: Vec3, max_distance: f32 },
    /// Toggled by gameplay events.
    Scripted {
        #[serde(default)]
        should_be_loaded: bool,
        #[serde(default)]
        should_be_visible: bool,
    },
    /// The world's own root level; never streamed.
    Persistent,
}

/// A streamable sub-level listed by a world package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingLevelInfo {
    pub package: PackageName,
    pub policy: PolicySpec,
    #[serde(default)]
    pub offset: Vec3,
    #[serde(default)]
    pub block_on_load: bool,
}

/// Everything a content loader produces for one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageContent {
    pub name: PackageName,
    #[serde(default)]
    pub guid: Option<PackageGuid>,
    #[serde(default)]
    pub kind: PackageKind,
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
    #[serde(default)]
    pub streaming_levels: Vec<StreamingLevelInfo>,
}

impl PackageContent {
    pub fn level(name: impl Into<PackageName>, actors: Vec<Actor>) -> Self {
        Self {
            name: name.into(),
            guid: None,
            kind: PackageKind::Level,
            actors,
            sequences: Vec::new(),
            streaming_levels: Vec::new(),
        }
    }

    pub fn world(name: impl Into<PackageName>, actors: Vec<Actor>) -> Self {
        Self {
            kind: PackageKind::World,
            ..Self::level(name, actors)
        }
    }

    pub fn with_streaming_level(mut self, info: StreamingLevelInfo) -> Self {
        self.streaming_levels.push(info);
        self
    }

    pub fn with_sequence(mut self, name: impl Into<String>) -> Self {
        self.sequences.push(Sequence::new(name));
        self
    }

    pub fn is_level(&self) -> bool {
        matches!(self.kind, PackageKind::World | PackageKind::Level)
    }

    /// Digest of the package's canonical JSON encoding.
    pub fn checksum(&self) -> Checksum {
        // Serializing plain data with derived impls cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        Checksum::of_bytes(&bytes)
    }

    /// Split into the level's actor arena, dropping world-only metadata.
    pub fn into_level(self) -> LevelContent {
        LevelContent::new(self.name, self.actors).with_sequences(self.sequences)
    }
}
