//! Values, calls and distributions.
//!
//! These are the immutable data shared by the sampler, the proof evaluator and
//! the wire protocol. Every type here has structural equality and hashing, so
//! calls and labels can be used directly as map keys.
//!
//! ## Encoding
//!
//! Values carry an explicit `type` discriminator so they decode unambiguously:
//!
//! ```text
//! {"type":"literal","ref":3}
//! {"type":"callRef","callIndex":0,"valueIndex":1}
//! {"type":"local","name":"coin"}
//! {"type":"proofvar","name":"bias"}
//! ```
//!
//! A `Distribution` is validated on decode exactly as on construction.

use crate::error::{ProbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name of the single built-in coin-flip family.
pub const PRIMITIVE_FUNCTION: &str = "bernouli";

// ============================================================================
// Values
// ============================================================================

/// Handle into a Model's externally-owned object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ValueRepr", into = "ValueRepr")]
pub struct LiteralRef(u64);

impl LiteralRef {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LiteralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ValueRepr", into = "ValueRepr")]
pub enum Value {
    Literal(LiteralRef),
    /// The `value_index`-th result of the `call_index`-th assignment of the
    /// enclosing Distribution.
    CallRef {
        call_index: usize,
        value_index: usize,
    },
    /// A variable bound by an earlier assignment of the enclosing Distribution.
    Local(String),
    /// Placeholder resolved during proof unification. Never part of a Distribution.
    ProofVar(String),
}

impl Value {
    pub fn literal(reference: LiteralRef) -> Self {
        Self::Literal(reference)
    }

    pub fn call_ref(call_index: usize, value_index: usize) -> Self {
        Self::CallRef {
            call_index,
            value_index,
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    pub fn proof_var(name: impl Into<String>) -> Self {
        Self::ProofVar(name.into())
    }

    pub fn as_literal(&self) -> Option<LiteralRef> {
        match self {
            Self::Literal(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<LiteralRef> for Value {
    fn from(value: LiteralRef) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(r) => write!(f, "{r}"),
            Value::CallRef {
                call_index,
                value_index,
            } => write!(f, "$({call_index}, {value_index})"),
            Value::Local(name) => write!(f, "{name}"),
            Value::ProofVar(name) => write!(f, "?{name}"),
        }
    }
}

/// Wire shape of a `Value` (internally tagged by `type`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ValueRepr {
    #[serde(rename = "literal")]
    Literal {
        #[serde(rename = "ref")]
        reference: u64,
    },
    #[serde(rename = "callRef")]
    CallRef {
        #[serde(rename = "callIndex")]
        call_index: usize,
        #[serde(rename = "valueIndex")]
        value_index: usize,
    },
    #[serde(rename = "local")]
    Local { name: String },
    #[serde(rename = "proofvar")]
    ProofVar { name: String },
}

impl From<ValueRepr> for Value {
    fn from(repr: ValueRepr) -> Self {
        match repr {
            ValueRepr::Literal { reference } => Value::Literal(LiteralRef(reference)),
            ValueRepr::CallRef {
                call_index,
                value_index,
            } => Value::CallRef {
                call_index,
                value_index,
            },
            ValueRepr::Local { name } => Value::Local(name),
            ValueRepr::ProofVar { name } => Value::ProofVar(name),
        }
    }
}

impl From<Value> for ValueRepr {
    fn from(value: Value) -> Self {
        match value {
            Value::Literal(r) => ValueRepr::Literal { reference: r.0 },
            Value::CallRef {
                call_index,
                value_index,
            } => ValueRepr::CallRef {
                call_index,
                value_index,
            },
            Value::Local(name) => ValueRepr::Local { name },
            Value::ProofVar(name) => ValueRepr::ProofVar { name },
        }
    }
}

impl TryFrom<ValueRepr> for LiteralRef {
    type Error = ProbError;

    fn try_from(repr: ValueRepr) -> Result<Self> {
        match repr {
            ValueRepr::Literal { reference } => Ok(LiteralRef(reference)),
            other => Err(ProbError::Codec {
                message: format!("expected a literal reference, got {}", Value::from(other)),
            }),
        }
    }
}

impl From<LiteralRef> for ValueRepr {
    fn from(value: LiteralRef) -> Self {
        ValueRepr::Literal { reference: value.0 }
    }
}

// ============================================================================
// Calls
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistrCall {
    pub function: String,
    pub parameters: Vec<Value>,
}

impl DistrCall {
    pub fn new(function: impl Into<String>, parameters: impl IntoIterator<Item = Value>) -> Self {
        Self {
            function: function.into(),
            parameters: parameters.into_iter().collect(),
        }
    }

    /// `bernouli(p)`.
    pub fn primitive(probability: LiteralRef) -> Self {
        Self::new(PRIMITIVE_FUNCTION, [Value::Literal(probability)])
    }

    /// Primitive calls are leaves: a Model never expands them.
    pub fn is_primitive(&self) -> bool {
        self.function == PRIMITIVE_FUNCTION
    }

    /// All parameters are literals.
    pub fn is_grounded(&self) -> bool {
        self.parameters.iter().all(|p| matches!(p, Value::Literal(_)))
    }

    pub fn literal_parameters(&self) -> Option<Vec<LiteralRef>> {
        self.parameters.iter().map(Value::as_literal).collect()
    }
}

impl fmt::Display for DistrCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function)?;
        for p in &self.parameters {
            write!(f, " {p}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Distributions
// ============================================================================

/// One step of a Distribution: a call and the names bound to its results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub call: DistrCall,
    pub variables: Vec<String>,
}

impl Assignment {
    pub fn new(call: DistrCall, variables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            call,
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }
}

/// A DAG-shaped program: assignments in dependency order plus a result list.
///
/// Invariants (checked by `Distribution::new` and on decode):
/// - every `CallRef`/`Local` refers to a variable bound by an *earlier* assignment,
/// - every variable name is assigned at most once,
/// - no `ProofVar` appears anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DistributionRepr", into = "DistributionRepr")]
pub struct Distribution {
    assignments: Vec<Assignment>,
    result: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DistributionRepr {
    assignments: Vec<Assignment>,
    result: Vec<Value>,
}

impl TryFrom<DistributionRepr> for Distribution {
    type Error = ProbError;

    fn try_from(repr: DistributionRepr) -> Result<Self> {
        Distribution::new(repr.assignments, repr.result)
    }
}

impl From<Distribution> for DistributionRepr {
    fn from(value: Distribution) -> Self {
        DistributionRepr {
            assignments: value.assignments,
            result: value.result,
        }
    }
}

impl Distribution {
    pub fn new(assignments: Vec<Assignment>, result: Vec<Value>) -> Result<Self> {
        let mut bound: HashSet<&str> = HashSet::new();
        for (index, assignment) in assignments.iter().enumerate() {
            for parameter in &assignment.call.parameters {
                check_reference(parameter, index, &assignments, &bound)?;
            }
            for name in &assignment.variables {
                if !bound.insert(name.as_str()) {
                    return Err(ProbError::malformed_distribution(format!(
                        "variable `{name}` is assigned more than once"
                    )));
                }
            }
        }
        for value in &result {
            check_reference(value, assignments.len(), &assignments, &bound)?;
        }
        Ok(Self {
            assignments,
            result,
        })
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn result(&self) -> &[Value] {
        &self.result
    }

    /// Position `(assignment, result index)` of a local variable.
    pub fn locate(&self, name: &str) -> Option<(usize, usize)> {
        self.assignments.iter().enumerate().find_map(|(i, a)| {
            a.variables
                .iter()
                .position(|v| v == name)
                .map(|k| (i, k))
        })
    }

    /// Every variable name bound by this distribution, in assignment order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.assignments
            .iter()
            .flat_map(|a| a.variables.iter().map(String::as_str))
    }
}

fn check_reference(
    value: &Value,
    position: usize,
    assignments: &[Assignment],
    bound: &HashSet<&str>,
) -> Result<()> {
    match value {
        Value::Literal(_) => Ok(()),
        Value::CallRef {
            call_index,
            value_index,
        } => {
            if *call_index >= position {
                return Err(ProbError::malformed_distribution(format!(
                    "{value} at position {position} is a forward or self reference"
                )));
            }
            let arity = assignments[*call_index].variables.len();
            if *value_index >= arity {
                return Err(ProbError::malformed_distribution(format!(
                    "{value} is out of range: call {call_index} binds {arity} values"
                )));
            }
            Ok(())
        }
        Value::Local(name) => {
            if bound.contains(name.as_str()) {
                Ok(())
            } else {
                Err(ProbError::malformed_distribution(format!(
                    "variable `{name}` is used before it is bound"
                )))
            }
        }
        Value::ProofVar(_) => Err(ProbError::malformed_distribution(format!(
            "proof variable {value} cannot appear in a distribution"
        ))),
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.assignments {
            writeln!(f, "{} <- {}", a.variables.join(" "), a.call)?;
        }
        let result: Vec<String> = self.result.iter().map(ToString::to_string).collect();
        write!(f, "return {}", result.join(" "))
    }
}

/// What `Model::get_distribution` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrResult {
    pub distribution: Distribution,
    /// Seconds the Model spent producing the distribution.
    pub time: f64,
}

impl DistrResult {
    pub fn new(distribution: Distribution, time: f64) -> Self {
        Self { distribution, time }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Results bound so far while walking a Distribution's assignments in order.
///
/// `T` is whatever the walker records per result: concrete `LiteralRef`s when
/// sampling, proof-side `Value`s when verifying a proof.
#[derive(Debug, Clone)]
pub struct Bindings<'d, T> {
    distribution: &'d Distribution,
    results: Vec<Vec<T>>,
}

impl<'d, T: Clone + Into<Value>> Bindings<'d, T> {
    pub fn new(distribution: &'d Distribution) -> Self {
        Self {
            distribution,
            results: Vec::with_capacity(distribution.assignments.len()),
        }
    }

    /// The next assignment that has not been bound yet.
    pub fn next_assignment(&self) -> Option<&'d Assignment> {
        self.distribution.assignments.get(self.results.len())
    }

    /// Bind the results of the next assignment.
    pub fn bind(&mut self, values: Vec<T>) -> Result<()> {
        let assignment = self.next_assignment().ok_or_else(|| {
            ProbError::malformed_distribution("more results bound than the distribution has calls")
        })?;
        if assignment.variables.len() != values.len() {
            return Err(ProbError::malformed_distribution(format!(
                "`{}` returned {} values but binds {} variables",
                assignment.call,
                values.len(),
                assignment.variables.len()
            )));
        }
        self.results.push(values);
        Ok(())
    }

    pub fn resolve(&self, value: &Value) -> Result<Value> {
        let (call_index, value_index) = match value {
            Value::Literal(_) | Value::ProofVar(_) => return Ok(value.clone()),
            Value::CallRef {
                call_index,
                value_index,
            } => (*call_index, *value_index),
            Value::Local(name) => self.distribution.locate(name).ok_or_else(|| {
                ProbError::malformed_distribution(format!("variable `{name}` is not bound"))
            })?,
        };
        self.results
            .get(call_index)
            .and_then(|r| r.get(value_index))
            .cloned()
            .map(Into::into)
            .ok_or_else(|| {
                ProbError::malformed_distribution(format!("{value} is referenced before it is bound"))
            })
    }

    pub fn resolve_call(&self, call: &DistrCall) -> Result<DistrCall> {
        let parameters = call
            .parameters
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(DistrCall {
            function: call.function.clone(),
            parameters,
        })
    }

    pub fn resolve_result(&self) -> Result<Vec<Value>> {
        self.distribution
            .result
            .iter()
            .map(|v| self.resolve(v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(n: u64) -> Value {
        Value::Literal(LiteralRef::new(n))
    }

    #[test]
    fn value_encoding_carries_type_discriminator() {
        let json = serde_json::to_value(Value::call_ref(2, 1)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "callRef", "callIndex": 2, "valueIndex": 1})
        );
        let json = serde_json::to_value(lit(9)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "literal", "ref": 9}));
        let json = serde_json::to_value(Value::proof_var("b")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "proofvar", "name": "b"}));
    }

    #[test]
    fn literal_ref_decode_rejects_other_variants() {
        let json = serde_json::json!({"type": "local", "name": "x"});
        assert!(serde_json::from_value::<LiteralRef>(json).is_err());
        let json = serde_json::json!({"type": "literal", "ref": 4});
        assert_eq!(
            serde_json::from_value::<LiteralRef>(json).unwrap(),
            LiteralRef::new(4)
        );
    }

    #[test]
    fn distribution_rejects_forward_call_ref() {
        let err = Distribution::new(
            vec![Assignment::new(
                DistrCall::new("f", [Value::call_ref(0, 0)]),
                ["x"],
            )],
            vec![],
        )
        .unwrap_err();
        assert_eq!(err.kind(), "malformed_distribution");
    }

    #[test]
    fn distribution_rejects_out_of_range_value_index() {
        let err = Distribution::new(
            vec![
                Assignment::new(DistrCall::new("f", []), ["x"]),
                Assignment::new(DistrCall::new("g", [Value::call_ref(0, 1)]), ["y"]),
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ProbError::MalformedDistribution { .. }));
    }

    #[test]
    fn distribution_rejects_rebinding_and_unbound_locals() {
        let rebinding = Distribution::new(
            vec![
                Assignment::new(DistrCall::new("f", []), ["x"]),
                Assignment::new(DistrCall::new("g", []), ["x"]),
            ],
            vec![],
        );
        assert!(rebinding.is_err());

        let unbound = Distribution::new(
            vec![Assignment::new(DistrCall::new("f", [Value::local("y")]), ["x"])],
            vec![Value::local("x")],
        );
        assert!(unbound.is_err());

        let self_use = Distribution::new(
            vec![Assignment::new(DistrCall::new("f", [Value::local("x")]), ["x"])],
            vec![],
        );
        assert!(self_use.is_err());
    }

    #[test]
    fn distribution_rejects_proof_vars() {
        let err = Distribution::new(vec![], vec![Value::proof_var("p")]).unwrap_err();
        assert!(matches!(err, ProbError::MalformedDistribution { .. }));
    }

    #[test]
    fn decode_validates_distribution() {
        let json = serde_json::json!({
            "assignments": [],
            "result": [{"type": "local", "name": "nope"}]
        });
        assert!(serde_json::from_value::<Distribution>(json).is_err());
    }

    #[test]
    fn bindings_resolve_locals_and_call_refs() {
        let distr = Distribution::new(
            vec![
                Assignment::new(DistrCall::new("f", [lit(1)]), ["a", "b"]),
                Assignment::new(
                    DistrCall::new("g", [Value::local("b"), Value::call_ref(0, 0)]),
                    ["c"],
                ),
            ],
            vec![Value::local("c"), lit(5)],
        )
        .unwrap();

        let mut bindings: Bindings<'_, LiteralRef> = Bindings::new(&distr);
        bindings
            .bind(vec![LiteralRef::new(10), LiteralRef::new(11)])
            .unwrap();
        let call = bindings
            .resolve_call(&distr.assignments()[1].call)
            .unwrap();
        assert_eq!(call, DistrCall::new("g", [lit(11), lit(10)]));
        assert!(bindings.resolve_result().is_err());

        bindings.bind(vec![LiteralRef::new(12)]).unwrap();
        assert_eq!(bindings.resolve_result().unwrap(), vec![lit(12), lit(5)]);
        assert!(bindings.bind(vec![]).is_err());
    }

    #[test]
    fn bindings_reject_arity_mismatch() {
        let distr = Distribution::new(
            vec![Assignment::new(DistrCall::new("f", []), ["a"])],
            vec![Value::local("a")],
        )
        .unwrap();
        let mut bindings: Bindings<'_, LiteralRef> = Bindings::new(&distr);
        assert!(bindings.bind(vec![]).is_err());
    }

    #[test]
    fn display_forms() {
        let call = DistrCall::new("flip", [lit(3), Value::proof_var("b")]);
        assert_eq!(call.to_string(), "flip @3 ?b");
        assert!(DistrCall::primitive(LiteralRef::new(0)).is_primitive());
        assert!(!call.is_grounded());
    }
}
