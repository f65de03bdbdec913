//! Type-erased message envelope.
//!
//! Handlers declare concrete inbound/outbound types, but the value that
//! actually travels the chain is an opaque [`Envelope`] carrying a runtime
//! type tag. Unwrapping at a handler that expects a different concrete type
//! is a *wrong-type* error: a mis-wired pipeline is a loud programmer error,
//! never silent corruption (§9).

use std::any::{type_name, Any, TypeId};
use std::fmt;

use crate::error::PipelineError;

/// An opaque, type-tagged value flowing through the pipeline.
pub struct Envelope {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

impl Envelope {
    /// Wraps `value`, tagging it with its concrete type.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Box::new(value),
        }
    }

    /// The declared concrete type's name, for diagnostics.
    pub fn declared_type(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the envelope's tag matches `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Consumes the envelope, downcasting to `T`. Fails with *wrong-type* if
    /// the runtime tag does not match.
    pub fn downcast<T: Send + 'static>(self) -> Result<T, PipelineError> {
        if self.type_id != TypeId::of::<T>() {
            return Err(PipelineError::wrong_type(type_name::<T>(), self.type_name));
        }
        Ok(*self
            .value
            .downcast::<T>()
            .expect("TypeId matched, downcast must succeed"))
    }

    /// Borrows the contained value as `T` without consuming the envelope.
    pub fn downcast_ref<T: Send + 'static>(&self) -> Result<&T, PipelineError> {
        self.value
            .downcast_ref::<T>()
            .ok_or_else(|| PipelineError::wrong_type(type_name::<T>(), self.type_name))
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("declared_type", &self.type_name)
            .finish()
    }
}

/// A pipeline-level user event, injected via `trigger_user_event` /
/// `user_inbound_event`. Modeled the same way as a message: type-erased with
/// a runtime tag.
pub type UserEvent = Envelope;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_matching_type_succeeds() {
        let envelope = Envelope::new(42i32);
        assert_eq!(envelope.downcast::<i32>().unwrap(), 42);
    }

    #[test]
    fn downcast_mismatched_type_is_wrong_type() {
        let envelope = Envelope::new(42i32);
        let err = envelope.downcast::<String>().unwrap_err();
        assert_eq!(err.code(), crate::error::codes::WRONG_TYPE);
    }
}
