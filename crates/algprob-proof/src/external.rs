//! Host-neutral proof files.
//!
//! Proofs are exchanged as JSON that never mentions object handles:
//!
//! ```json
//! [
//!   {
//!     "label": {"function": "gate", "parameters": [false], "result": [true]},
//!     "mappings": [{"c": true}]
//!   },
//!   {
//!     "label": {"function": "decideBias", "parameters": [], "result": [{"$var": "b"}]},
//!     "mappings": [{"coin": true, "bias": {"$var": "b"}}]
//!   }
//! ]
//! ```
//!
//! `{"$var": "name"}` denotes a proof variable; every other JSON value is a
//! literal that gets interned through `Model::from_external` on import.

use crate::proof::{ProbLabel, Proof, VariableMapping};
use algprob_model::{DistrCall, Model, ProbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved key marking a proof variable.
pub const PROOF_VAR_KEY: &str = "$var";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLabel {
    pub function: String,
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
    #[serde(default)]
    pub result: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalProof {
    pub label: ExternalLabel,
    #[serde(default)]
    pub mappings: Vec<BTreeMap<String, serde_json::Value>>,
}

pub fn parse_proofs(text: &str) -> Result<Vec<ExternalProof>> {
    Ok(serde_json::from_str(text)?)
}

/// Intern every literal and build checked `Proof`s, preserving order.
pub fn import_proofs<M: Model + ?Sized>(
    model: &mut M,
    proofs: &[ExternalProof],
) -> Result<Vec<Proof>> {
    proofs.iter().map(|p| import_proof(model, p)).collect()
}

/// Parse and import in one step.
pub fn load_proofs<M: Model + ?Sized>(model: &mut M, text: &str) -> Result<Vec<Proof>> {
    let proofs = parse_proofs(text)?;
    import_proofs(model, &proofs)
}

pub fn import_proof<M: Model + ?Sized>(model: &mut M, proof: &ExternalProof) -> Result<Proof> {
    let label = import_label(model, &proof.label)?;
    let mut mappings = Vec::with_capacity(proof.mappings.len());
    for external in &proof.mappings {
        let mut mapping = VariableMapping::new();
        for (name, v) in external {
            mapping.insert(name.clone(), import_value(model, v)?);
        }
        mappings.push(mapping);
    }
    Proof::new(label, mappings)
}

pub fn import_label<M: Model + ?Sized>(model: &mut M, label: &ExternalLabel) -> Result<ProbLabel> {
    let parameters = label
        .parameters
        .iter()
        .map(|v| import_value(model, v))
        .collect::<Result<Vec<_>>>()?;
    let result = label
        .result
        .iter()
        .map(|v| import_value(model, v))
        .collect::<Result<Vec<_>>>()?;
    Ok(ProbLabel::new(
        DistrCall::new(label.function.clone(), parameters),
        result,
    ))
}

pub fn import_value<M: Model + ?Sized>(model: &mut M, value: &serde_json::Value) -> Result<Value> {
    if let Some(object) = value.as_object() {
        if let Some(name) = object.get(PROOF_VAR_KEY) {
            let name = name.as_str().filter(|_| object.len() == 1).ok_or_else(|| {
                ProbError::Codec {
                    message: format!(
                        "`{PROOF_VAR_KEY}` must be the only key and name a variable, got {value}"
                    ),
                }
            })?;
            return Ok(Value::proof_var(name));
        }
    }
    Ok(Value::Literal(model.from_external(value.clone())?))
}

/// Host-neutral form of a label, for reports.
pub fn export_label<M: Model + ?Sized>(model: &mut M, label: &ProbLabel) -> Result<ExternalLabel> {
    let parameters = label
        .call
        .parameters
        .iter()
        .map(|v| export_value(model, v))
        .collect::<Result<Vec<_>>>()?;
    let result = label
        .result
        .iter()
        .map(|v| export_value(model, v))
        .collect::<Result<Vec<_>>>()?;
    Ok(ExternalLabel {
        function: label.call.function.clone(),
        parameters,
        result,
    })
}

pub fn export_value<M: Model + ?Sized>(model: &mut M, value: &Value) -> Result<serde_json::Value> {
    match value {
        Value::Literal(r) => model.to_external(*r),
        Value::ProofVar(name) => {
            let mut object = serde_json::Map::new();
            object.insert(PROOF_VAR_KEY.to_string(), name.clone().into());
            Ok(serde_json::Value::Object(object))
        }
        other => Err(ProbError::Codec {
            message: format!("{other} has no host-neutral form"),
        }),
    }
}

impl std::fmt::Display for ExternalLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |vs: &[serde_json::Value]| {
            vs.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{}({}) -> [{}]",
            self.function,
            join(&self.parameters),
            join(&self.result)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algprob_model::FunctionModel;
    use serde_json::json;

    #[test]
    fn import_interns_literals_and_recognizes_proof_vars() {
        let mut model = FunctionModel::builder().build();
        let text = r#"[
            {"label": {"function": "f", "parameters": [0.5], "result": [{"$var": "x"}]},
             "mappings": [{"a": true, "b": {"$var": "x"}}, {"a": false, "b": [1, 2]}]}
        ]"#;
        let proofs = load_proofs(&mut model, text).unwrap();
        assert_eq!(proofs.len(), 1);
        let label = proofs[0].label();
        assert_eq!(label.result, vec![Value::proof_var("x")]);
        let p = label.call.parameters[0].as_literal().unwrap();
        assert_eq!(model.to_external(p).unwrap(), json!(0.5));

        let second = &proofs[0].mappings()[1];
        let b = second.get("b").unwrap().as_literal().unwrap();
        assert_eq!(model.to_external(b).unwrap(), json!([1, 2]));
        assert_eq!(model.live_objects(), 4);
    }

    #[test]
    fn malformed_proof_var_marker_is_rejected() {
        let mut model = FunctionModel::builder().build();
        let err = import_value(&mut model, &json!({"$var": 3})).unwrap_err();
        assert_eq!(err.kind(), "codec");
        let err = import_value(&mut model, &json!({"$var": "x", "extra": 1})).unwrap_err();
        assert_eq!(err.kind(), "codec");
    }

    #[test]
    fn mismatched_mapping_names_fail_on_import() {
        let mut model = FunctionModel::builder().build();
        let text = r#"[{"label": {"function": "f"}, "mappings": [{"a": 1}, {"b": 1}]}]"#;
        let err = load_proofs(&mut model, text).unwrap_err();
        assert!(matches!(err, ProbError::MalformedProof { .. }));
    }

    #[test]
    fn export_renders_host_neutral_label() {
        let mut model = FunctionModel::builder().build();
        let label = import_label(
            &mut model,
            &ExternalLabel {
                function: "g".into(),
                parameters: vec![json!("k")],
                result: vec![json!({"$var": "out"})],
            },
        )
        .unwrap();
        let external = export_label(&mut model, &label).unwrap();
        assert_eq!(external.parameters, vec![json!("k")]);
        assert_eq!(external.result, vec![json!({"$var": "out"})]);
        assert_eq!(external.to_string(), r#"g("k") -> [{"$var":"out"}]"#);
    }
}
