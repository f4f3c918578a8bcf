use glam::Vec3;
use levelflow_common::{LoadRequestId, PackageName};
use levelflow_kernel::{LevelContent, StreamingLevelInfo};

use crate::loader::LoadError;
use crate::policy::{self, StreamingPolicy};

/// A streamable unit of world content and the desired/actual state the
/// scheduler tracks for it.
#[derive(Debug)]
pub struct LevelDescriptor {
    package: PackageName,
    policy: Box<dyn StreamingPolicy>,
    /// Translation applied to the level's actors when it is activated.
    pub offset: Vec3,
    applied_offset: Vec3,
    pending_offset: Vec3,
    /// Loads for this level bypass the GC gate and ask the host to block.
    pub should_block_on_load: bool,
    requested_loaded: bool,
    requested_visible: bool,
    is_visible: bool,
    content: Option<LevelContent>,
    load_request: Option<LoadRequestId>,
    load_failure: Option<LoadError>,
    requesting_removal: bool,
}

impl LevelDescriptor {
    pub fn new(package: impl Into<PackageName>, policy: Box<dyn StreamingPolicy>) -> Self {
        Self {
            package: package.into(),
            policy,
            offset: Vec3::ZERO,
            applied_offset: Vec3::ZERO,
            pending_offset: Vec3::ZERO,
            should_block_on_load: false,
            requested_loaded: false,
            requested_visible: false,
            is_visible: false,
            content: None,
            load_request: None,
            load_failure: None,
            requesting_removal: false,
        }
    }

    pub fn from_info(info: &StreamingLevelInfo) -> Self {
        let mut desc = Self::new(info.package.clone(), policy::from_spec(&info.policy));
        desc.offset = info.offset;
        desc.should_block_on_load = info.block_on_load;
        desc
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }

    /// Start out with already loaded content (e.g. content that shipped with the world).
    pub fn with_content(mut self, content: LevelContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn package(&self) -> &PackageName {
        &self.package
    }

    pub fn policy(&self) -> &dyn StreamingPolicy {
        self.policy.as_ref()
    }

    pub fn policy_mut(&mut self) -> &mut dyn StreamingPolicy {
        self.policy.as_mut()
    }

    pub fn requested_loaded(&self) -> bool {
        self.requested_loaded
    }

    pub fn requested_visible(&self) -> bool {
        self.requested_visible
    }

    pub(crate) fn set_requested(&mut self, loaded: bool, visible: bool) {
        self.requested_loaded = loaded;
        self.requested_visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.is_visible = visible;
    }

    pub fn content(&self) -> Option<&LevelContent> {
        self.content.as_ref()
    }

    pub fn content_mut(&mut self) -> Option<&mut LevelContent> {
        self.content.as_mut()
    }

    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    /// Freshly loaded content sits at its authored position, so no offset has been applied to it yet.
    pub(crate) fn attach_content(&mut self, content: LevelContent) {
        self.content = Some(content);
        self.load_request = None;
        self.load_failure = None;
        self.reset_applied_offset();
    }

    pub(crate) fn take_content(&mut self) -> Option<LevelContent> {
        let content = self.content.take();
        self.reset_applied_offset();
        content
    }

    fn reset_applied_offset(&mut self) {
        self.applied_offset = Vec3::ZERO;
        self.pending_offset = Vec3::ZERO;
    }

    pub fn load_request(&self) -> Option<LoadRequestId> {
        self.load_request
    }

    pub(crate) fn set_load_request(&mut self, request: Option<LoadRequestId>) {
        self.load_request = request;
    }

    pub fn has_load_request_pending(&self) -> bool {
        self.load_request.is_some()
    }

    pub fn load_failure(&self) -> Option<&LoadError> {
        self.load_failure.as_ref()
    }

    pub(crate) fn set_load_failure(&mut self, failure: Option<LoadError>) {
        self.load_failure = failure;
    }

    /// Wants to be loaded, has nothing, and the last load attempt failed.
    pub fn is_stalled(&self) -> bool {
        self.requested_loaded && self.content.is_none() && self.load_failure.is_some()
    }

    pub fn is_requesting_removal(&self) -> bool {
        self.requesting_removal
    }

    pub(crate) fn request_removal(&mut self) {
        self.requesting_removal = true;
    }

    /// Whether this level's content is the one a visibility request is pending for.
    pub fn has_visibility_request_pending(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(|c| c.visibility_request_pending())
    }

    /// Capture the translation to apply for the activation that is about to start.
    pub(crate) fn begin_activation_offset(&mut self) -> Vec3 {
        self.pending_offset = self.offset - self.applied_offset;
        self.applied_offset = self.offset;
        self.pending_offset
    }

    pub(crate) fn pending_offset(&self) -> Vec3 {
        self.pending_offset
    }
}
