//! Owners: the named objects scheduled actions belong to.
//!
//! The kernel never needs to know what an owner is. It only asks for names
//! when writing traces and inspection rows, and compares owners by identity
//! when deduplicating scheduled processes.

use std::fmt;
use std::sync::Arc;

/// A named target object that actions run on behalf of.
pub trait Owner: Send + Sync + fmt::Debug {
    /// Stable name used in traces and deduplication diagnostics.
    fn name(&self) -> &str;

    /// Human-readable name for displays. Defaults to [`name`](Self::name).
    fn display_name(&self) -> String {
        self.name().to_owned()
    }

    /// Optional region/area the owner belongs to, shown in inspection rows.
    fn region(&self) -> Option<&str> {
        None
    }
}

/// Shared handle to an [`Owner`].
pub type OwnerRef = Arc<dyn Owner>;

/// Identity comparison of two owner handles.
pub fn same_owner(a: &OwnerRef, b: &OwnerRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

// ---------------------------------------------------------------------------
// NamedOwner
// ---------------------------------------------------------------------------

/// Minimal [`Owner`] carrying just a name and optional region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedOwner {
    name: String,
    region: Option<String>,
}

impl NamedOwner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Convenience: wrap into a shared [`OwnerRef`].
    pub fn shared(name: impl Into<String>) -> OwnerRef {
        Arc::new(Self::new(name))
    }
}

impl Owner for NamedOwner {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}
