//! Deferred actions: what a process runs when it first gets control.

use std::fmt;
use std::sync::Arc;

use crate::error::ActionResult;
use crate::owner::OwnerRef;
use crate::process::ProcessContext;

/// Body of an action. Runs on a pooled process thread and may suspend any
/// number of times through the [`ProcessContext`].
pub type ActionBody = Box<dyn FnOnce(&ProcessContext) -> ActionResult + Send + 'static>;

/// A named unit of work bound to an owner.
///
/// The `(owner name, action name)` pair is all the kernel uses for tracing,
/// inspection and deduplication; the body is opaque.
pub struct Action {
    target: OwnerRef,
    name: Arc<str>,
    body: ActionBody,
}

impl Action {
    pub fn new<F>(target: OwnerRef, name: impl Into<Arc<str>>, body: F) -> Self
    where
        F: FnOnce(&ProcessContext) -> ActionResult + Send + 'static,
    {
        Self {
            target,
            name: name.into(),
            body: Box::new(body),
        }
    }

    pub fn target(&self) -> &OwnerRef {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn label(&self) -> ActionLabel {
        ActionLabel {
            target: self.target.clone(),
            name: self.name.clone(),
        }
    }

    pub(crate) fn into_body(self) -> ActionBody {
        self.body
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("target", &self.target.name())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Owner + action name, kept by a process for the life of its activation.
#[derive(Debug, Clone)]
pub struct ActionLabel {
    pub target: OwnerRef,
    pub name: Arc<str>,
}

impl ActionLabel {
    pub fn owner_name(&self) -> &str {
        self.target.name()
    }
}

impl fmt::Display for ActionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target.name(), self.name)
    }
}
