//! Message kinds and runtime type keys.
//!
//! Every value sent through the mediator implements one of the marker traits
//! below. Commands are requests whose response is [`Unit`]; queries and plain
//! requests carry an arbitrary response type; notifications have no response.
//!
//! # Example
//!
//! ```ignore
//! use source_mediator::{Command, Query, Request, Notification};
//!
//! struct CreateColor { name: String }
//! impl Request for CreateColor { type Response = (); }
//! impl Command for CreateColor {}
//!
//! struct GetColor { id: u64 }
//! impl Request for GetColor { type Response = Option<Color>; }
//! impl Query for GetColor {}
//!
//! struct ColorCreated { id: u64 }
//! impl Notification for ColorCreated {}
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The "no value" response of a command.
pub type Unit = ();

/// A message answered by exactly one handler.
pub trait Request: Send + Sync + 'static {
    /// Value produced by the handler.
    type Response: Send + 'static;
}

/// A state-changing request with no response value.
pub trait Command: Request<Response = Unit> {}

/// A read-only request.
pub trait Query: Request {}

/// A broadcast message delivered to zero or more handlers.
pub trait Notification: Send + Sync + 'static {}

/// Type-erased message as it travels through the pipeline.
pub type AnyMessage = Arc<dyn Any + Send + Sync>;

/// Type-erased response value.
pub type AnyValue = Box<dyn Any + Send>;

/// Runtime identity of a message or response type.
///
/// Equality and hashing use the [`TypeId`] only; the name is carried for
/// diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key built from a runtime id and a name.
    ///
    /// Used when only the erased value is at hand.
    pub fn from_parts(id: TypeId, name: &'static str) -> Self {
        Self { id, name }
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this is the key of [`Unit`].
    #[inline]
    pub fn is_unit(&self) -> bool {
        self.id == TypeId::of::<Unit>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
