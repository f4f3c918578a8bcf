//! Asynchronous content loading.
//!
//! Loaders run I/O wherever they like but never touch streaming state: each
//! request carries a reply channel and the completion is sent as a message.
//! The consumer drains its receiver once per tick on the simulation thread.

use crossbeam_channel::Sender;
use levelflow_common::{LoadRequestId, PackageGuid, PackageName};
use levelflow_kernel::PackageContent;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Errors a load request can complete with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("package '{package}' not found")]
    ContentNotFound { package: PackageName },
    #[error("package '{package}' does not contain a level")]
    NotALevel { package: PackageName },
    #[error("failed to read package '{package}': {reason}")]
    Io { package: PackageName, reason: String },
}

/// Message delivered on the reply channel when a request finishes.
#[derive(Debug, Clone)]
pub struct LoadCompletion {
    pub request: LoadRequestId,
    pub package: PackageName,
    pub result: Result<PackageContent, LoadError>,
}

/// Produces package content asynchronously.
pub trait AsyncContentLoader {
    /// Start loading `package`. The completion is sent on `reply`.
    fn request_load(
        &mut self,
        package: &PackageName,
        guid: Option<PackageGuid>,
        reply: &Sender<LoadCompletion>,
    ) -> LoadRequestId;

    fn is_loading_anything(&self) -> bool;

    /// Block until every outstanding request has delivered its completion.
    fn flush_all(&mut self);

    /// Whether a package file (optionally of a specific version) can be found.
    fn package_exists(&self, package: &PackageName, guid: Option<PackageGuid>) -> bool;

    /// Content that is still resident from an earlier load and can be reused without I/O.
    fn find_resident(&self, _package: &PackageName) -> Option<PackageContent> {
        None
    }
}

struct InFlight {
    id: LoadRequestId,
    package: PackageName,
    guid: Option<PackageGuid>,
    remaining: u32,
    reply: Sender<LoadCompletion>,
}

/// In-memory package catalog with a configurable latency measured in polls.
///
/// Completions are only delivered from `poll` or `flush_all`, which makes
/// multi-tick load behaviour reproducible.
pub struct CatalogLoader {
    catalog: BTreeMap<PackageName, PackageContent>,
    latency: u32,
    in_flight: VecDeque<InFlight>,
    next_id: u64,
    requests: Vec<PackageName>,
}

impl CatalogLoader {
    pub fn new() -> Self {
        Self {
            catalog: BTreeMap::new(),
            latency: 1,
            in_flight: VecDeque::new(),
            next_id: 1,
            requests: Vec::new(),
        }
    }

    /// Number of `poll` calls a request needs before it completes.
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self
    }

    pub fn insert(&mut self, package: PackageContent) {
        self.catalog.insert(package.name.clone(), package);
    }

    pub fn with_package(mut self, package: PackageContent) -> Self {
        self.insert(package);
        self
    }

    pub fn get(&self, package: &PackageName) -> Option<&PackageContent> {
        self.catalog.get(package)
    }

    /// Every package ever requested, in request order.
    pub fn requests(&self) -> &[PackageName] {
        &self.requests
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Advance every outstanding request by one poll, delivering those that finish.
    pub fn poll(&mut self) -> usize {
        let mut delivered = 0;
        let mut still = VecDeque::with_capacity(self.in_flight.len());
        while let Some(mut req) = self.in_flight.pop_front() {
            req.remaining = req.remaining.saturating_sub(1);
            if req.remaining == 0 {
                self.deliver(req);
                delivered += 1;
            } else {
                still.push_back(req);
            }
        }
        self.in_flight = still;
        delivered
    }

    fn resolve(&self, package: &PackageName, guid: Option<PackageGuid>) -> Result<PackageContent, LoadError> {
        let content = self
            .catalog
            .get(package)
            .ok_or_else(|| LoadError::ContentNotFound {
                package: package.clone(),
            })?;
        if let (Some(wanted), Some(have)) = (guid, content.guid) {
            if wanted != have {
                return Err(LoadError::ContentNotFound {
                    package: package.clone(),
                });
            }
        }
        Ok(content.clone())
    }

    fn deliver(&self, req: InFlight) {
        let result = self.resolve(&req.package, req.guid);
        tracing::trace!(package = %req.package, ok = result.is_ok(), "load complete");
        // The requester may have gone away (cancelled travel, removed scheduler).
        let _ = req.reply.send(LoadCompletion {
            request: req.id,
            package: req.package,
            result,
        });
    }
}

impl Default for CatalogLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncContentLoader for CatalogLoader {
    fn request_load(
        &mut self,
        package: &PackageName,
        guid: Option<PackageGuid>,
        reply: &Sender<LoadCompletion>,
    ) -> LoadRequestId {
        let id = LoadRequestId(self.next_id);
        self.next_id += 1;
        self.requests.push(package.clone());
        let req = InFlight {
            id,
            package: package.clone(),
            guid,
            remaining: self.latency,
            reply: reply.clone(),
        };
        if self.latency == 0 {
            self.deliver(req);
        } else {
            self.in_flight.push_back(req);
        }
        id
    }

    fn is_loading_anything(&self) -> bool {
        !self.in_flight.is_empty()
    }

    fn flush_all(&mut self) {
        while let Some(req) = self.in_flight.pop_front() {
            self.deliver(req);
        }
    }

    fn package_exists(&self, package: &PackageName, guid: Option<PackageGuid>) -> bool {
        self.resolve(package, guid).is_ok()
    }
}

/// Loads `<root>/<package>.yaml` manifests on background worker threads.
pub struct DirectoryLoader {
    root: PathBuf,
    next_id: u64,
    outstanding: Arc<AtomicUsize>,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: 1,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn path_for(&self, package: &PackageName) -> PathBuf {
        self.root.join(format!("{}.yaml", package.as_str()))
    }

    fn read_package(path: &std::path::Path, package: &PackageName) -> Result<PackageContent, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::ContentNotFound {
                package: package.clone(),
            },
            _ => LoadError::Io {
                package: package.clone(),
                reason: e.to_string(),
            },
        })?;
        serde_yaml::from_str(&text).map_err(|e| LoadError::Io {
            package: package.clone(),
            reason: e.to_string(),
        })
    }
}

impl AsyncContentLoader for DirectoryLoader {
    fn request_load(
        &mut self,
        package: &PackageName,
        _guid: Option<PackageGuid>,
        reply: &Sender<LoadCompletion>,
    ) -> LoadRequestId {
        let id = LoadRequestId(self.next_id);
        self.next_id += 1;
        let path = self.path_for(package);
        let package = package.clone();
        let reply = reply.clone();
        let outstanding = Arc::clone(&self.outstanding);
        outstanding.fetch_add(1, Ordering::SeqCst);
        std::thread::spawn(move || {
            let result = Self::read_package(&path, &package);
            let _ = reply.send(LoadCompletion {
                request: id,
                package,
                result,
            });
            outstanding.fetch_sub(1, Ordering::SeqCst);
        });
        id
    }

    fn is_loading_anything(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) > 0
    }

    fn flush_all(&mut self) {
        while self.is_loading_anything() {
            std::thread::yield_now();
        }
    }

    fn package_exists(&self, package: &PackageName, _guid: Option<PackageGuid>) -> bool {
        self.path_for(package).is_file()
    }
}
