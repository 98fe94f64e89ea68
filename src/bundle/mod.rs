//! Bundles and the boundary to the hosting framework.
//!
//! ## Contents
//! - [`Bundle`] cheap, comparable handle identifying an installed bundle
//! - [`BundleHost`] lookups and hooks the hosting framework supplies
//! - [`MemoryHost`] in-memory host used by tests and small embeddings
//! - [`BundleActivator`] start/stop entry points of a bundle

mod activator;
mod host;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub use activator::BundleActivator;
pub use host::{BundleHost, MemoryHost};

/// Identifier of an installed bundle, unique per host.
pub type BundleId = u64;

/// Handle to an installed bundle.
///
/// Two handles are equal iff they carry the same [`BundleId`].
#[derive(Clone, Debug)]
pub struct Bundle {
    id: BundleId,
    symbolic_name: Arc<str>,
    location: Arc<str>,
}

impl Bundle {
    pub fn new(id: BundleId, symbolic_name: impl Into<Arc<str>>, location: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            symbolic_name: symbolic_name.into(),
            location: location.into(),
        }
    }

    #[inline]
    pub fn id(&self) -> BundleId {
        self.id
    }

    #[inline]
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    #[inline]
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Bundle {}

impl Hash for Bundle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.symbolic_name, self.id)
    }
}
