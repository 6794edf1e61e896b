//! The Model contract.
//!
//! A Model is a collection of random functions plus an object store. Every
//! object in the store is addressed by a `LiteralRef` and carries a reference
//! count; once a count reaches zero the Model may discard the object.
//!
//! Reference-count bookkeeping is the Model's and the caller's responsibility.
//! The sampler and the proof evaluator call into the contract but never rely on
//! reading a handle after they have signalled its last use.
//!
//! Two realizations live in this workspace:
//! - `FunctionModel` (in-process, built from Rust closures), and
//! - `algprob_remote::RemoteModel` (forwards every operation over a stream).

use crate::error::{ProbError, Result};
use crate::value::{DistrCall, DistrResult, LiteralRef};

pub trait Model {
    /// Expand a fully-grounded, non-primitive call.
    ///
    /// Must be deterministic: two calls with equal arguments yield
    /// distributions that are interchangeable for unification.
    ///
    /// The parameters stay owned by the caller. Each literal occurrence in the
    /// returned Distribution is a new count handed to the caller.
    fn get_distribution(&mut self, call: &DistrCall) -> Result<DistrResult>;

    /// Add `delta` (possibly negative) to the reference count of `reference`.
    fn modify_reference_count(&mut self, reference: LiteralRef, delta: i64) -> Result<()>;

    /// Host-neutral (JSON) form of an object. Does not touch reference counts.
    fn to_external(&mut self, reference: LiteralRef) -> Result<serde_json::Value>;

    /// Intern a host-neutral value; the new object starts with count 1.
    fn from_external(&mut self, value: serde_json::Value) -> Result<LiteralRef>;

    /// Must agree with comparing `to_external` forms.
    fn is_equal(&mut self, a: LiteralRef, b: LiteralRef) -> Result<bool>;
}

impl<M: Model + ?Sized> Model for &mut M {
    fn get_distribution(&mut self, call: &DistrCall) -> Result<DistrResult> {
        (**self).get_distribution(call)
    }

    fn modify_reference_count(&mut self, reference: LiteralRef, delta: i64) -> Result<()> {
        (**self).modify_reference_count(reference, delta)
    }

    fn to_external(&mut self, reference: LiteralRef) -> Result<serde_json::Value> {
        (**self).to_external(reference)
    }

    fn from_external(&mut self, value: serde_json::Value) -> Result<LiteralRef> {
        (**self).from_external(value)
    }

    fn is_equal(&mut self, a: LiteralRef, b: LiteralRef) -> Result<bool> {
        (**self).is_equal(a, b)
    }
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn get_distribution(&mut self, call: &DistrCall) -> Result<DistrResult> {
        (**self).get_distribution(call)
    }

    fn modify_reference_count(&mut self, reference: LiteralRef, delta: i64) -> Result<()> {
        (**self).modify_reference_count(reference, delta)
    }

    fn to_external(&mut self, reference: LiteralRef) -> Result<serde_json::Value> {
        (**self).to_external(reference)
    }

    fn from_external(&mut self, value: serde_json::Value) -> Result<LiteralRef> {
        (**self).from_external(value)
    }

    fn is_equal(&mut self, a: LiteralRef, b: LiteralRef) -> Result<bool> {
        (**self).is_equal(a, b)
    }
}

/// Enforces the contract at the boundary of an untrusted Model.
///
/// - `get_distribution` only accepts grounded, non-primitive calls,
/// - a zero delta never reaches the wrapped Model,
/// - identical handles are equal without a round trip.
#[derive(Debug)]
pub struct CheckedModel<M> {
    inner: M,
}

impl<M: Model> CheckedModel<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: Model> Model for CheckedModel<M> {
    fn get_distribution(&mut self, call: &DistrCall) -> Result<DistrResult> {
        if !call.is_grounded() {
            return Err(ProbError::UngroundedCall {
                call: call.to_string(),
            });
        }
        if call.is_primitive() {
            return Err(ProbError::UnknownFunction {
                function: call.function.clone(),
            });
        }
        self.inner.get_distribution(call)
    }

    fn modify_reference_count(&mut self, reference: LiteralRef, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.inner.modify_reference_count(reference, delta)
    }

    fn to_external(&mut self, reference: LiteralRef) -> Result<serde_json::Value> {
        self.inner.to_external(reference)
    }

    fn from_external(&mut self, value: serde_json::Value) -> Result<LiteralRef> {
        self.inner.from_external(value)
    }

    fn is_equal(&mut self, a: LiteralRef, b: LiteralRef) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        self.inner.is_equal(a, b)
    }
}
