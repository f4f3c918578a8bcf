//! Shared identifiers and value types used by every levelflow crate.

mod types;

pub use types::{
    Checksum, ConnectionId, EntityId, LoadRequestId, PackageGuid, PackageName, Transform,
};

pub fn crate_info() -> &'static str {
    concat!("levelflow-common v", env!("CARGO_PKG_VERSION"))
}
