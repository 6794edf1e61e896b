//! In-process Model built from Rust closures.
//!
//! A distribution function receives the host-neutral (JSON) values of its
//! arguments and describes its program through a `DistributionBuilder`:
//!
//! ```
//! use algprob_model::function_model::{Arg, FunctionModel};
//! use serde_json::json;
//!
//! let model = FunctionModel::builder()
//!     .function("decideBias", |b, _args| {
//!         b.flip(0.5, "coin")?;
//!         b.call("biasFromBool", [Arg::local("coin")], ["bias"])?;
//!         Ok(vec![Arg::local("bias")])
//!     })
//!     .function("biasFromBool", |_b, args| {
//!         let high = args[0].as_bool().unwrap_or(false);
//!         Ok(vec![Arg::literal(json!(if high { 0.15 } else { 0.85 }))])
//!     })
//!     .build();
//! # let _ = model;
//! ```
//!
//! Local variables are bound through an explicit, ordered name map: each name
//! is bound exactly once, and only names bound by an earlier call may be used.
//! Literal arguments are interned into the object store (count 1) when the
//! Model hands out the resulting `Distribution`.

use crate::error::{ProbError, Result};
use crate::model::Model;
use crate::value::{Assignment, DistrCall, DistrResult, Distribution, LiteralRef, Value, PRIMITIVE_FUNCTION};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

/// Signature of a distribution function.
pub type DistributionFn =
    Box<dyn Fn(&mut DistributionBuilder, &[serde_json::Value]) -> Result<Vec<Arg>>>;

/// An argument (or result) while building a distribution.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(serde_json::Value),
    Local(String),
}

impl Arg {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }
}

impl From<serde_json::Value> for Arg {
    fn from(value: serde_json::Value) -> Self {
        Self::Literal(value)
    }
}

#[derive(Debug, Clone)]
struct PendingAssignment {
    function: String,
    args: Vec<Arg>,
    variables: Vec<String>,
}

/// Records the calls of one distribution function invocation.
#[derive(Debug, Default)]
pub struct DistributionBuilder {
    pending: Vec<PendingAssignment>,
    bound: HashSet<String>,
}

impl DistributionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `variables <- function(args)`.
    pub fn call<I, V>(&mut self, function: &str, args: I, variables: V) -> Result<()>
    where
        I: IntoIterator<Item = Arg>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let args: Vec<Arg> = args.into_iter().collect();
        for arg in &args {
            self.check_bound(arg)?;
        }
        let variables: Vec<String> = variables.into_iter().map(Into::into).collect();
        let mut fresh = HashSet::new();
        for name in &variables {
            if self.bound.contains(name) || !fresh.insert(name.clone()) {
                return Err(ProbError::malformed_distribution(format!(
                    "`{name}` is bound more than once in a call to `{function}`"
                )));
            }
        }
        self.bound.extend(fresh);
        self.pending.push(PendingAssignment {
            function: function.to_string(),
            args,
            variables,
        });
        Ok(())
    }

    /// Append `variable <- bernouli(probability)`.
    pub fn flip(&mut self, probability: f64, variable: &str) -> Result<()> {
        self.call(
            PRIMITIVE_FUNCTION,
            [Arg::literal(probability)],
            [variable],
        )
    }

    fn check_bound(&self, arg: &Arg) -> Result<()> {
        match arg {
            Arg::Local(name) if !self.bound.contains(name) => Err(
                ProbError::malformed_distribution(format!("variable `{name}` is not bound")),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    value: serde_json::Value,
    count: i64,
}

/// Registers distribution functions for a `FunctionModel`.
#[derive(Default)]
pub struct FunctionModelBuilder {
    functions: HashMap<String, DistributionFn>,
}

impl FunctionModelBuilder {
    /// Register `name`. A function named `bernouli` is never consulted: the
    /// primitive is built in.
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut DistributionBuilder, &[serde_json::Value]) -> Result<Vec<Arg>> + 'static,
    {
        self.functions.insert(name.to_string(), Box::new(f));
        self
    }

    pub fn build(self) -> FunctionModel {
        FunctionModel {
            functions: self.functions,
            objects: HashMap::new(),
            next_ref: 0,
        }
    }
}

/// Model whose functions are Rust closures and whose objects are JSON values.
pub struct FunctionModel {
    functions: HashMap<String, DistributionFn>,
    objects: HashMap<u64, StoredObject>,
    next_ref: u64,
}

impl fmt::Debug for FunctionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionModel")
            .field("functions", &names)
            .field("live_objects", &self.objects.len())
            .finish()
    }
}

impl FunctionModel {
    pub fn builder() -> FunctionModelBuilder {
        FunctionModelBuilder::default()
    }

    /// Number of objects whose count has not reached zero.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn reference_count(&self, reference: LiteralRef) -> Option<i64> {
        self.objects.get(&reference.raw()).map(|o| o.count)
    }

    fn intern(&mut self, value: serde_json::Value) -> LiteralRef {
        let raw = self.next_ref;
        self.next_ref += 1;
        self.objects.insert(raw, StoredObject { value, count: 1 });
        LiteralRef::new(raw)
    }

    fn object(&self, reference: LiteralRef) -> Result<&StoredObject> {
        self.objects
            .get(&reference.raw())
            .ok_or(ProbError::UnknownReference {
                reference: reference.raw(),
            })
    }

    fn arg_value(&mut self, arg: Arg) -> Value {
        match arg {
            Arg::Literal(json) => Value::Literal(self.intern(json)),
            Arg::Local(name) => Value::Local(name),
        }
    }
}

impl Model for FunctionModel {
    fn get_distribution(&mut self, call: &DistrCall) -> Result<DistrResult> {
        if call.is_primitive() {
            return Err(ProbError::UnknownFunction {
                function: call.function.clone(),
            });
        }
        let refs = call.literal_parameters().ok_or_else(|| ProbError::UngroundedCall {
            call: call.to_string(),
        })?;
        let args = refs
            .into_iter()
            .map(|r| self.object(r).map(|o| o.value.clone()))
            .collect::<Result<Vec<_>>>()?;

        let function = self
            .functions
            .get(&call.function)
            .ok_or_else(|| ProbError::UnknownFunction {
                function: call.function.clone(),
            })?;

        let started = Instant::now();
        let mut builder = DistributionBuilder::new();
        let result = function(&mut builder, &args)?;
        for arg in &result {
            builder.check_bound(arg)?;
        }

        let assignments = builder
            .pending
            .into_iter()
            .map(|p| {
                let parameters: Vec<Value> = p.args.into_iter().map(|a| self.arg_value(a)).collect();
                Assignment::new(DistrCall::new(p.function, parameters), p.variables)
            })
            .collect();
        let result = result.into_iter().map(|a| self.arg_value(a)).collect();
        let distribution = Distribution::new(assignments, result)?;
        let time = started.elapsed().as_secs_f64();

        tracing::trace!(call = %call, time, "expanded distribution function");
        Ok(DistrResult::new(distribution, time))
    }

    fn modify_reference_count(&mut self, reference: LiteralRef, delta: i64) -> Result<()> {
        let object = self
            .objects
            .get_mut(&reference.raw())
            .ok_or(ProbError::UnknownReference {
                reference: reference.raw(),
            })?;
        let count = object.count + delta;
        if count < 0 {
            return Err(ProbError::InvalidReferenceCount {
                reference: reference.raw(),
                count,
            });
        }
        if count == 0 {
            self.objects.remove(&reference.raw());
        } else {
            object.count = count;
        }
        Ok(())
    }

    fn to_external(&mut self, reference: LiteralRef) -> Result<serde_json::Value> {
        Ok(self.object(reference)?.value.clone())
    }

    fn from_external(&mut self, value: serde_json::Value) -> Result<LiteralRef> {
        Ok(self.intern(value))
    }

    fn is_equal(&mut self, a: LiteralRef, b: LiteralRef) -> Result<bool> {
        Ok(self.object(a)?.value == self.object(b)?.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckedModel;
    use serde_json::json;

    fn bias_model() -> FunctionModel {
        FunctionModel::builder()
            .function("decideBias", |b, _args| {
                b.flip(0.5, "coin")?;
                b.call("biasFromBool", [Arg::local("coin")], ["bias"])?;
                Ok(vec![Arg::local("bias")])
            })
            .function("biasFromBool", |_b, args| {
                let high = args[0].as_bool().unwrap_or(false);
                Ok(vec![Arg::literal(if high { 0.15 } else { 0.85 })])
            })
            .build()
    }

    #[test]
    fn get_distribution_interns_literals_and_keeps_locals() {
        let mut model = bias_model();
        let result = model
            .get_distribution(&DistrCall::new("decideBias", []))
            .unwrap();
        let distr = &result.distribution;
        assert_eq!(distr.assignments().len(), 2);
        assert!(distr.assignments()[0].call.is_primitive());
        assert_eq!(distr.result(), &[Value::local("bias")]);

        let p = distr.assignments()[0].call.parameters[0].as_literal().unwrap();
        assert_eq!(model.to_external(p).unwrap(), json!(0.5));
        assert_eq!(model.reference_count(p), Some(1));
        assert!(result.time >= 0.0);
    }

    #[test]
    fn get_distribution_reads_argument_objects() {
        let mut model = bias_model();
        let t = model.from_external(json!(true)).unwrap();
        let result = model
            .get_distribution(&DistrCall::new("biasFromBool", [Value::Literal(t)]))
            .unwrap();
        let r = result.distribution.result()[0].as_literal().unwrap();
        assert_eq!(model.to_external(r).unwrap(), json!(0.15));
    }

    #[test]
    fn unknown_and_primitive_functions_are_rejected() {
        let mut model = bias_model();
        let err = model.get_distribution(&DistrCall::new("nope", [])).unwrap_err();
        assert!(matches!(err, ProbError::UnknownFunction { .. }));

        let p = model.from_external(json!(0.5)).unwrap();
        let err = model.get_distribution(&DistrCall::primitive(p)).unwrap_err();
        assert!(matches!(err, ProbError::UnknownFunction { .. }));
    }

    #[test]
    fn builder_rejects_rebinding_and_unbound_use() {
        let mut model = FunctionModel::builder()
            .function("twice", |b, _| {
                b.flip(0.5, "x")?;
                b.flip(0.5, "x")?;
                Ok(vec![])
            })
            .function("dangling", |_b, _| Ok(vec![Arg::local("ghost")]))
            .build();
        let err = model.get_distribution(&DistrCall::new("twice", [])).unwrap_err();
        assert!(matches!(err, ProbError::MalformedDistribution { .. }));
        let err = model.get_distribution(&DistrCall::new("dangling", [])).unwrap_err();
        assert!(matches!(err, ProbError::MalformedDistribution { .. }));
    }

    #[test]
    fn reference_count_reaching_zero_releases_object() {
        let mut model = bias_model();
        let r = model.from_external(json!({"k": [1, 2]})).unwrap();
        model.modify_reference_count(r, 2).unwrap();
        model.modify_reference_count(r, -2).unwrap();
        assert_eq!(model.reference_count(r), Some(1));
        model.modify_reference_count(r, -1).unwrap();
        assert_eq!(model.live_objects(), 0);

        let err = model.to_external(r).unwrap_err();
        assert_eq!(err, ProbError::UnknownReference { reference: r.raw() });
        assert!(model.modify_reference_count(r, 1).is_err());
    }

    #[test]
    fn reference_count_cannot_go_negative() {
        let mut model = bias_model();
        let r = model.from_external(json!(1)).unwrap();
        let err = model.modify_reference_count(r, -3).unwrap_err();
        assert!(matches!(err, ProbError::InvalidReferenceCount { count: -2, .. }));
        assert_eq!(model.reference_count(r), Some(1));
    }

    #[test]
    fn is_equal_agrees_with_external_form() {
        let mut model = bias_model();
        let a = model.from_external(json!([1, "x"])).unwrap();
        let b = model.from_external(json!([1, "x"])).unwrap();
        let c = model.from_external(json!([2, "x"])).unwrap();
        assert!(model.is_equal(a, b).unwrap());
        assert!(!model.is_equal(a, c).unwrap());
    }

    #[test]
    fn checked_model_enforces_grounding_and_skips_noops() {
        let mut model = CheckedModel::new(bias_model());
        let err = model
            .get_distribution(&DistrCall::new("biasFromBool", [Value::proof_var("b")]))
            .unwrap_err();
        assert!(matches!(err, ProbError::UngroundedCall { .. }));

        let r = model.from_external(json!(3)).unwrap();
        model.modify_reference_count(r, 0).unwrap();
        assert!(model.is_equal(r, r).unwrap());
        model.modify_reference_count(r, -1).unwrap();
        assert_eq!(model.inner().live_objects(), 0);
    }
}
