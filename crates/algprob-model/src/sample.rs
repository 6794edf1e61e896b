//! Monte Carlo sampling.
//!
//! `sample` draws one concrete outcome of a call: primitive calls flip a coin,
//! everything else is expanded through the Model and sampled assignment by
//! assignment. Randomness enters only at primitive calls, so a seeded `Rng`
//! reproduces a run exactly.
//!
//! Ownership: a call consumes one count of each literal parameter, and every
//! literal occurrence in a returned Distribution carries one count of its own.
//! A sampled value is bumped once per extra use and released when unused, so
//! repeated draws leave the object store flat.

use crate::error::{ProbError, Result};
use crate::model::Model;
use crate::value::{Bindings, DistrCall, Distribution, LiteralRef, Value};
use rand::Rng;

/// Draw one outcome of `call`, consuming its literal parameters on success.
/// The returned handles are owned by the caller.
pub fn sample<M, R>(model: &mut M, call: &DistrCall, rng: &mut R) -> Result<Vec<LiteralRef>>
where
    M: Model + ?Sized,
    R: Rng + ?Sized,
{
    if call.is_primitive() {
        return sample_primitive(model, call, rng).map(|r| vec![r]);
    }
    let distr_result = model.get_distribution(call)?;
    for reference in call.parameters.iter().filter_map(Value::as_literal) {
        model.modify_reference_count(reference, -1)?;
    }
    sample_distr(model, &distr_result.distribution, rng)
}

/// Sample every assignment in order, then return the resolved result list.
/// Takes over the counts carried by the literals of `distribution`.
pub fn sample_distr<M, R>(
    model: &mut M,
    distribution: &Distribution,
    rng: &mut R,
) -> Result<Vec<LiteralRef>>
where
    M: Model + ?Sized,
    R: Rng + ?Sized,
{
    let mut uses = use_counts(distribution).into_iter();
    let mut bindings: Bindings<'_, LiteralRef> = Bindings::new(distribution);
    while let Some(assignment) = bindings.next_assignment() {
        let call = bindings.resolve_call(&assignment.call)?;
        let values = sample(model, &call, rng)?;
        bindings.bind(values.clone())?;
        let counts = uses.next().unwrap_or_default();
        for (reference, count) in values.into_iter().zip(counts) {
            let delta = count as i64 - 1;
            if delta != 0 {
                model.modify_reference_count(reference, delta)?;
            }
        }
    }
    bindings
        .resolve_result()?
        .into_iter()
        .map(|v| {
            v.as_literal().ok_or_else(|| {
                ProbError::malformed_distribution(format!("result {v} did not resolve to a literal"))
            })
        })
        .collect()
}

/// How often each bound value is read by later parameters or the result,
/// indexed by `[assignment][value]`.
fn use_counts(distribution: &Distribution) -> Vec<Vec<usize>> {
    let mut counts: Vec<Vec<usize>> = distribution
        .assignments()
        .iter()
        .map(|a| vec![0; a.variables.len()])
        .collect();
    let reads = distribution
        .assignments()
        .iter()
        .flat_map(|a| a.call.parameters.iter())
        .chain(distribution.result());
    for value in reads {
        let slot = match value {
            Value::CallRef {
                call_index,
                value_index,
            } => Some((*call_index, *value_index)),
            Value::Local(name) => distribution.locate(name),
            Value::Literal(_) | Value::ProofVar(_) => None,
        };
        if let Some(count) = slot.and_then(|(i, k)| counts.get_mut(i)?.get_mut(k)) {
            *count += 1;
        }
    }
    counts
}

fn sample_primitive<M, R>(model: &mut M, call: &DistrCall, rng: &mut R) -> Result<LiteralRef>
where
    M: Model + ?Sized,
    R: Rng + ?Sized,
{
    let [parameter] = call.parameters.as_slice() else {
        return Err(ProbError::invalid_parameter(
            call,
            format!("expected one parameter, got {}", call.parameters.len()),
        ));
    };
    let reference = parameter.as_literal().ok_or_else(|| ProbError::UngroundedCall {
        call: call.to_string(),
    })?;
    let probability = read_probability(model, call, reference)?;
    model.modify_reference_count(reference, -1)?;

    let outcome = rng.gen::<f64>() < probability;
    tracing::trace!(call = %call, probability, outcome, "flipped coin");
    model.from_external(serde_json::Value::Bool(outcome))
}

/// Read a primitive call's probability parameter and check it lies in [0, 1].
pub fn read_probability<M: Model + ?Sized>(
    model: &mut M,
    call: &DistrCall,
    reference: LiteralRef,
) -> Result<f64> {
    let external = model.to_external(reference)?;
    let probability = external.as_f64().ok_or_else(|| {
        ProbError::invalid_parameter(call, format!("probability {external} is not a number"))
    })?;
    if !(0.0..=1.0).contains(&probability) {
        return Err(ProbError::invalid_parameter(
            call,
            format!("probability {probability} is outside [0, 1]"),
        ));
    }
    Ok(probability)
}
