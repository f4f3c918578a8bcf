//! Connected peers as seen from the server: which levels each peer has made
//! visible and whether it agrees with us about package versions.

use levelflow_common::{Checksum, ConnectionId, EntityId, PackageName};
use levelflow_stream::NetworkNotifier;
use std::collections::{BTreeMap, BTreeSet};

/// Answer to a peer's package version confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageVerdict {
    Ok,
    Mismatch,
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    visible_levels: BTreeSet<PackageName>,
    local_packages: BTreeMap<PackageName, Checksum>,
    awaiting: BTreeSet<PackageName>,
    close_reason: Option<String>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.close_reason.is_none()
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    pub fn visible_levels(&self) -> &BTreeSet<PackageName> {
        &self.visible_levels
    }

    pub fn is_awaiting(&self, package: &PackageName) -> bool {
        self.awaiting.contains(package)
    }
}

/// Server-side view of every peer connection.
#[derive(Debug, Default)]
pub struct NetSession {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u32,
    expected: BTreeMap<PackageName, Checksum>,
    channels_closed: usize,
    current_world: Option<PackageName>,
}

impl NetSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.connections.insert(
            id,
            Connection {
                id,
                visible_levels: BTreeSet::new(),
                local_packages: BTreeMap::new(),
                awaiting: BTreeSet::new(),
                close_reason: None,
            },
        );
        tracing::info!(%id, "peer connected");
        id
    }

    /// Record the checksum of the copy of `package` installed on the peer.
    pub fn install_package(&mut self, id: ConnectionId, package: impl Into<PackageName>, checksum: Checksum) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.local_packages.insert(package.into(), checksum);
        }
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn open_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(|c| c.is_open())
    }

    pub fn close(&mut self, id: ConnectionId, reason: impl Into<String>) {
        if let Some(conn) = self.connections.get_mut(&id) {
            if conn.is_open() {
                let reason = reason.into();
                tracing::warn!(%id, %reason, "closing connection");
                conn.close_reason = Some(reason);
                conn.awaiting.clear();
            }
        }
    }

    pub fn current_world(&self) -> Option<&PackageName> {
        self.current_world.as_ref()
    }

    /// Actor channels closed because their actor was condemned.
    pub fn channels_closed(&self) -> usize {
        self.channels_closed
    }

    /// Ask every open peer to confirm it has `package` at `checksum`.
    pub fn begin_package_sync(&mut self, package: &PackageName, checksum: Checksum) {
        tracing::debug!(%package, checksum = %checksum.short(), "package sync started");
        self.expected.insert(package.clone(), checksum);
        for conn in self.connections.values_mut().filter(|c| c.is_open()) {
            conn.awaiting.insert(package.clone());
        }
    }

    /// A peer reports the checksum of its copy. A mismatch closes only that peer.
    pub fn confirm_package_version(
        &mut self,
        id: ConnectionId,
        package: &PackageName,
        checksum: Checksum,
    ) -> PackageVerdict {
        let Some(expected) = self.expected.get(package).copied() else {
            return PackageVerdict::Ok;
        };
        if expected == checksum {
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.awaiting.remove(package);
            }
            return PackageVerdict::Ok;
        }
        self.close(
            id,
            format!(
                "package {package} version mismatch: have {}, peer has {}",
                expected.short(),
                checksum.short()
            ),
        );
        PackageVerdict::Mismatch
    }

    /// Deliver every outstanding peer reply, answering from each peer's installed packages.
    pub fn process_confirmations(&mut self) -> usize {
        let replies: Vec<(ConnectionId, PackageName, Option<Checksum>)> = self
            .connections
            .values()
            .filter(|c| c.is_open())
            .flat_map(|c| {
                c.awaiting
                    .iter()
                    .map(move |p| (c.id, p.clone(), c.local_packages.get(p).copied()))
            })
            .collect();
        let count = replies.len();
        for (id, package, local) in replies {
            match local {
                Some(checksum) => {
                    self.confirm_package_version(id, &package, checksum);
                }
                None => self.close(id, format!("package {package} missing on peer")),
            }
        }
        count
    }

    /// Every open peer has confirmed `package`.
    pub fn is_package_sync_complete(&self, package: &PackageName) -> bool {
        self.open_connections().all(|c| !c.is_awaiting(package))
    }
}

impl NetworkNotifier for NetSession {
    fn notify_level_visible(&mut self, package: &PackageName) {
        for conn in self.connections.values_mut().filter(|c| c.is_open()) {
            conn.visible_levels.insert(package.clone());
        }
    }

    fn notify_level_hidden(&mut self, package: &PackageName) {
        for conn in self.connections.values_mut() {
            conn.visible_levels.remove(package);
        }
    }

    fn notify_world_swapped(&mut self, world: &PackageName) {
        for conn in self.connections.values_mut() {
            conn.visible_levels.clear();
        }
        self.expected.clear();
        self.current_world = Some(world.clone());
        tracing::info!(%world, peers = self.open_connections().count(), "peers notified of world swap");
    }

    fn notify_actor_destroyed(&mut self, _actor: EntityId) {
        self.channels_closed += 1;
    }
}
