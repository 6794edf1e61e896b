//! Property tests for the value/distribution wire encoding.
//!
//! Distributions are generated well-formed by construction (every reference
//! points backwards), so decoding must succeed and reproduce the value.

use algprob_model::{Assignment, DistrCall, Distribution, LiteralRef, Value};
use proptest::prelude::*;

const MAX_CALLS: usize = 6;
const MAX_ARITY: usize = 3;

fn literal_strategy() -> impl Strategy<Value = Value> {
    (0u64..1_000).prop_map(|n| Value::Literal(LiteralRef::new(n)))
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        literal_strategy(),
        (0usize..10, 0usize..4).prop_map(|(c, v)| Value::call_ref(c, v)),
        "[a-z]{1,6}".prop_map(Value::local),
        "[a-z]{1,6}".prop_map(Value::proof_var),
    ]
}

/// A parameter of assignment `index`, given the arities of earlier assignments.
fn parameter_strategy(index: usize, arities: Vec<usize>) -> BoxedStrategy<Value> {
    let earlier: Vec<(usize, usize)> = (0..index)
        .flat_map(|c| (0..arities[c]).map(move |v| (c, v)))
        .collect();
    if earlier.is_empty() {
        return literal_strategy().boxed();
    }
    let refs = earlier.clone();
    prop_oneof![
        literal_strategy(),
        prop::sample::select(refs).prop_map(|(c, v)| Value::call_ref(c, v)),
        prop::sample::select(earlier).prop_map(|(c, v)| Value::local(format!("v{c}_{v}"))),
    ]
    .boxed()
}

fn distribution_strategy() -> impl Strategy<Value = Distribution> {
    prop::collection::vec(1usize..=MAX_ARITY, 0..=MAX_CALLS).prop_flat_map(|arities| {
        let n = arities.len();
        let params: Vec<BoxedStrategy<Vec<Value>>> = (0..n)
            .map(|i| prop::collection::vec(parameter_strategy(i, arities.clone()), 0..3).boxed())
            .collect();
        let result = prop::collection::vec(parameter_strategy(n, arities.clone()), 0..3);
        (Just(arities), params, result).prop_map(|(arities, params, result)| {
            let assignments = params
                .into_iter()
                .enumerate()
                .map(|(i, ps)| {
                    let vars = (0..arities[i]).map(|v| format!("v{i}_{v}"));
                    Assignment::new(DistrCall::new(format!("f{i}"), ps), vars)
                })
                .collect();
            Distribution::new(assignments, result).expect("generated distributions are well-formed")
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn value_round_trips(v in value_strategy()) {
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, v);
    }

    #[test]
    fn call_round_trips(name in "[a-zA-Z]{1,8}", params in prop::collection::vec(value_strategy(), 0..5)) {
        let call = DistrCall::new(name, params);
        let json = serde_json::to_value(&call).unwrap();
        let back: DistrCall = serde_json::from_value(json).unwrap();
        prop_assert_eq!(back, call);
    }

    #[test]
    fn distribution_round_trips(d in distribution_strategy()) {
        let json = serde_json::to_string(&d).unwrap();
        let back: Distribution = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, d);
    }

    #[test]
    fn distribution_references_only_point_backwards(d in distribution_strategy()) {
        for (i, a) in d.assignments().iter().enumerate() {
            for p in &a.call.parameters {
                if let Value::CallRef { call_index, .. } = p {
                    prop_assert!(*call_index < i);
                }
                if let Value::Local(name) = p {
                    let (c, _) = d.locate(name).expect("local is bound");
                    prop_assert!(c < i);
                }
            }
        }
    }
}
