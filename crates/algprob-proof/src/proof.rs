//! Proof representation.
//!
//! A `ProbLabel` states "this call returns exactly these values". A `Proof`
//! backs a label with one or more `VariableMapping`s: each mapping assigns a
//! value to every local variable of the call's Distribution and describes one
//! execution path. Paths of one proof must be mutually exclusive; the
//! evaluator checks that when it expands the proof.

use algprob_model::{DistrCall, LiteralRef, ProbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Labels
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbLabel {
    pub call: DistrCall,
    pub result: Vec<Value>,
}

impl ProbLabel {
    pub fn new(call: DistrCall, result: impl IntoIterator<Item = Value>) -> Self {
        Self {
            call,
            result: result.into_iter().collect(),
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.call.is_primitive()
    }

    /// Call parameters and result are all literals.
    pub fn is_grounded(&self) -> bool {
        self.call.is_grounded() && self.result.iter().all(|v| v.as_literal().is_some())
    }

    pub fn literal_refs(&self) -> impl Iterator<Item = LiteralRef> + '_ {
        self.call
            .parameters
            .iter()
            .chain(self.result.iter())
            .filter_map(Value::as_literal)
    }
}

impl fmt::Display for ProbLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ->", self.call)?;
        for v in &self.result {
            write!(f, " {v}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Variable mappings
// ============================================================================

/// One instantiation of a Distribution's local variables.
///
/// Values are literals or proof variables; ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableMapping(BTreeMap<String, Value>);

impl VariableMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a later value for the same name replaces the earlier one.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for VariableMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for VariableMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

// ============================================================================
// Proofs
// ============================================================================

/// A label plus its alternative execution paths.
///
/// Invariants (checked by `Proof::new` and on decode):
/// - every mapping binds the same set of names,
/// - mapping values and label values are literals or proof variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProofRepr", into = "ProofRepr")]
pub struct Proof {
    label: ProbLabel,
    mappings: Vec<VariableMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProofRepr {
    label: ProbLabel,
    #[serde(default)]
    mappings: Vec<VariableMapping>,
}

impl TryFrom<ProofRepr> for Proof {
    type Error = ProbError;

    fn try_from(repr: ProofRepr) -> Result<Self> {
        Proof::new(repr.label, repr.mappings)
    }
}

impl From<Proof> for ProofRepr {
    fn from(value: Proof) -> Self {
        ProofRepr {
            label: value.label,
            mappings: value.mappings,
        }
    }
}

impl Proof {
    pub fn new(label: ProbLabel, mappings: Vec<VariableMapping>) -> Result<Self> {
        for v in label.call.parameters.iter().chain(label.result.iter()) {
            check_proof_value(&label, v)?;
        }
        if let Some(first) = mappings.first() {
            let names: BTreeSet<&str> = first.names().collect();
            for mapping in &mappings {
                let other: BTreeSet<&str> = mapping.names().collect();
                if other != names {
                    return Err(ProbError::malformed_proof(
                        &label,
                        format!("mapping {mapping} binds different names than {first}"),
                    ));
                }
                for (_, v) in mapping.iter() {
                    check_proof_value(&label, v)?;
                }
            }
        }
        Ok(Self { label, mappings })
    }

    /// A proof whose call expands to a Distribution without local variables.
    pub fn axiom(label: ProbLabel) -> Self {
        Self {
            label,
            mappings: vec![VariableMapping::new()],
        }
    }

    /// A proof of a primitive (coin flip) label.
    pub fn primitive(label: ProbLabel) -> Self {
        Self {
            label,
            mappings: Vec::new(),
        }
    }

    pub fn label(&self) -> &ProbLabel {
        &self.label
    }

    pub fn mappings(&self) -> &[VariableMapping] {
        &self.mappings
    }

    /// Names bound by every mapping (empty when there are no mappings).
    pub fn variable_names(&self) -> BTreeSet<&str> {
        self.mappings
            .first()
            .map(|m| m.names().collect())
            .unwrap_or_default()
    }
}

fn check_proof_value(label: &ProbLabel, value: &Value) -> Result<()> {
    match value {
        Value::Literal(_) | Value::ProofVar(_) => Ok(()),
        other => Err(ProbError::malformed_proof(
            label,
            format!("{other} is neither a literal nor a proof variable"),
        )),
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        for m in &self.mappings {
            write!(f, "\n  | {m}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(n: u64) -> Value {
        Value::Literal(LiteralRef::new(n))
    }

    #[test]
    fn label_display() {
        let label = ProbLabel::new(DistrCall::new("f", [lit(1)]), [lit(4)]);
        assert_eq!(label.to_string(), "f @1 -> @4");
        assert!(label.is_grounded());
        let open = ProbLabel::new(DistrCall::new("f", [lit(1)]), [Value::proof_var("x")]);
        assert!(!open.is_grounded());
        assert_eq!(open.literal_refs().count(), 1);
    }

    #[test]
    fn mappings_must_bind_the_same_names() {
        let label = ProbLabel::new(DistrCall::new("f", []), [lit(1)]);
        let err = Proof::new(
            label.clone(),
            vec![
                VariableMapping::new().with("a", lit(1)),
                VariableMapping::new().with("b", lit(1)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ProbError::MalformedProof { .. }));

        let ok = Proof::new(
            label,
            vec![
                VariableMapping::new().with("a", lit(1)).with("b", lit(2)),
                [("b", lit(3)), ("a", lit(4))].into_iter().collect(),
            ],
        )
        .unwrap();
        assert_eq!(ok.variable_names().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn proofs_reject_distribution_values() {
        let label = ProbLabel::new(DistrCall::new("f", [Value::local("x")]), []);
        assert!(Proof::new(label, vec![]).is_err());

        let label = ProbLabel::new(DistrCall::new("f", []), []);
        let mapping = VariableMapping::new().with("a", Value::call_ref(0, 0));
        assert!(Proof::new(label, vec![mapping]).is_err());
    }

    #[test]
    fn proof_decode_is_validated() {
        let label = serde_json::json!({"call": {"function": "f", "parameters": []}, "result": []});
        let json = serde_json::json!({
            "label": label,
            "mappings": [
                {"a": {"type": "literal", "ref": 1}},
                {"b": {"type": "literal", "ref": 1}}
            ]
        });
        assert!(serde_json::from_value::<Proof>(json).is_err());

        let json = serde_json::json!({"label": label});
        let proof: Proof = serde_json::from_value(json).unwrap();
        assert!(proof.mappings().is_empty());
    }
}
