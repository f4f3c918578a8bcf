use anyhow::Context;
use glam::Vec3;
use levelflow_common::{Checksum, PackageName};
use levelflow_kernel::{PackageContent, World};
use levelflow_stream::{CatalogLoader, StreamConfig};
use levelflow_travel::{NetSession, TravelUrl, WorldContext};
use serde::Deserialize;
use std::path::Path;

/// A simulated peer. Packages listed in `stale` are installed at a different version.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerSpec {
    #[serde(default)]
    pub stale: Vec<PackageName>,
}

/// Everything a demo run needs: the package catalog, the starting world and the peers.
#[derive(Debug, Deserialize)]
pub struct PackageManifest {
    pub start: PackageName,
    #[serde(default = "default_transition_map")]
    pub transition_map: PackageName,
    #[serde(default)]
    pub config: StreamConfig,
    #[serde(default)]
    pub viewers: Vec<Vec3>,
    /// Loader polls before a request completes.
    #[serde(default = "default_latency")]
    pub latency: u32,
    #[serde(default)]
    pub peers: Vec<PeerSpec>,
    pub packages: Vec<PackageContent>,
}

fn default_transition_map() -> PackageName {
    PackageName::from(TravelUrl::DEFAULT_TRANSITION_MAP)
}

fn default_latency() -> u32 {
    1
}

impl PackageManifest {
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let manifest: Self = serde_yaml::from_str(text)?;
        if !manifest.packages.iter().any(|p| p.name == manifest.start) {
            anyhow::bail!("start world '{}' is not in the package list", manifest.start);
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn loader(&self) -> CatalogLoader {
        let mut loader = CatalogLoader::new().with_latency(self.latency);
        for package in &self.packages {
            loader.insert(package.clone());
        }
        loader
    }

    /// The starting world, begun, with a scheduler for its streaming levels.
    pub fn context(&self) -> anyhow::Result<WorldContext> {
        let start = self
            .packages
            .iter()
            .find(|p| p.name == self.start)
            .cloned()
            .with_context(|| format!("start world '{}' missing", self.start))?;
        let mut world = World::from_package(start);
        world.begin_play();
        Ok(WorldContext::new(world, self.config.clone()))
    }

    /// Connect one peer per spec with every package installed.
    pub fn session(&self) -> NetSession {
        let mut net = NetSession::new();
        for peer in &self.peers {
            let id = net.connect();
            for package in &self.packages {
                let checksum = if peer.stale.contains(&package.name) {
                    Checksum::of_bytes(format!("{}-stale", package.name).as_bytes())
                } else {
                    package.checksum()
                };
                net.install_package(id, package.name.clone(), checksum);
            }
        }
        net
    }
}
