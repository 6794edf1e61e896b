//! Proof evaluation: unification, expansion and log-space fixed-point solving.
//!
//! Given proofs that calls produce specific results, the evaluator computes a
//! lower bound on each proved label's probability:
//!
//! 1. **Expand** every proof: fetch the label's Distribution from the Model,
//!    derive one sub-label per assignment for each alternative mapping,
//!    unify them with the Distribution, and record every alternative as one
//!    polynomial term (a product of sub-label probabilities).
//! 2. **Sort** the label dependency graph into strongly connected components.
//! 3. **Solve** components dependencies-first. A recursive component is
//!    iterated from probability zero until no label's log-probability grows by
//!    more than the configured tolerance (the least fixed point).
//! 4. **Finalize** into `ProofResults`.
//!
//! The stages are typestates: each transition consumes the evaluator and
//! returns the next stage, so a solved evaluator cannot be expanded again.
//!
//! ## Canonical handles
//!
//! A Model may hand out a fresh handle for every occurrence of a literal. The
//! evaluator maps each handle to the first handle it saw with the same
//! marshalled (`to_external`, serialized JSON) form and stores only those in
//! labels and cache keys, so equal objects always name the same label.
//!
//! The evaluator never releases handles: labels in the results stay readable
//! through the Model.

use crate::graphsort::DependencyGraph;
use crate::proof::{ProbLabel, Proof, VariableMapping};
use algprob_model::{
    read_probability, Bindings, DistrCall, DistrResult, Distribution, LiteralRef, Model, ProbError,
    Result, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_TOLERANCE: f64 = 1e-5;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// A recursive component is solved once no log-probability grows by more than this.
    pub tolerance: f64,
    /// Pass budget per recursive component; `None` is unbounded.
    pub max_passes: Option<usize>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_passes: None,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStats {
    pub labels: usize,
    pub components: usize,
    pub recursive_components: usize,
    /// Solver passes summed over all components.
    pub passes: usize,
    pub model_queries: usize,
    pub cache_hits: usize,
    /// Seconds the Model reported spending on `get_distribution`.
    pub model_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelProbability {
    pub label: ProbLabel,
    /// `null` in JSON when the label is impossible.
    #[serde(with = "log_space")]
    pub log_prob: f64,
}

impl LabelProbability {
    pub fn probability(&self) -> f64 {
        self.log_prob.exp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofVarBinding {
    pub name: String,
    pub value: LiteralRef,
}

/// Everything a finished evaluation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofResults {
    /// Every label that received a proof, in order of first appearance.
    pub labels: Vec<LabelProbability>,
    /// Canonical label of each input proof, in input order.
    pub proved: Vec<ProbLabel>,
    /// Proof variables in the order unification introduced them.
    pub bindings: Vec<ProofVarBinding>,
    pub stats: SolveStats,
}

impl ProofResults {
    /// Log-probability of a canonical label.
    pub fn log_prob(&self, label: &ProbLabel) -> Option<f64> {
        self.labels
            .iter()
            .find(|l| &l.label == label)
            .map(|l| l.log_prob)
    }

    pub fn probability(&self, label: &ProbLabel) -> Option<f64> {
        self.log_prob(label).map(f64::exp)
    }

    /// `(label, log-probability)` for each input proof, in input order.
    pub fn proved_log_probs(&self) -> impl Iterator<Item = (&ProbLabel, f64)> + '_ {
        let by_label: HashMap<&ProbLabel, f64> =
            self.labels.iter().map(|l| (&l.label, l.log_prob)).collect();
        self.proved.iter().map(move |label| {
            (
                label,
                by_label.get(label).copied().unwrap_or(f64::NEG_INFINITY),
            )
        })
    }

    pub fn binding(&self, name: &str) -> Option<LiteralRef> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.value)
    }
}

mod log_space {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

/// `ln(Σ exp(x))` without overflow; `-∞` for an empty slice.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    max + xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

// ============================================================================
// Stages
// ============================================================================

/// Accepting proofs.
#[derive(Debug)]
pub struct Unstarted;

/// All proofs expanded; the label set is fixed.
#[derive(Debug)]
pub struct Expanded;

/// Label graph decomposed into components.
#[derive(Debug)]
pub struct Sorted {
    graph: DependencyGraph,
    components: Vec<Vec<usize>>,
}

/// Every label has its log-probability.
#[derive(Debug)]
pub struct Solved {
    log_probs: Vec<f64>,
}

/// One alternative: the grounded sub-label of every assignment.
type Term = Vec<ProbLabel>;

/// A term after primitive sub-labels were folded into a coefficient.
#[derive(Debug, Clone)]
struct NumericTerm {
    log_coeff: f64,
    deps: Vec<usize>,
}

impl NumericTerm {
    fn value(&self, log_probs: &[f64]) -> f64 {
        self.deps
            .iter()
            .fold(self.log_coeff, |acc, &d| acc + log_probs[d])
    }
}

fn label_log_prob(terms: &[NumericTerm], log_probs: &[f64]) -> f64 {
    let values: Vec<f64> = terms.iter().map(|t| t.value(log_probs)).collect();
    log_sum_exp(&values)
}

/// Per-run state, dropped when the evaluator is finalized.
struct EnvState<M> {
    model: M,
    config: SolverConfig,
    canonical_by_form: HashMap<String, LiteralRef>,
    canonical_of: HashMap<LiteralRef, LiteralRef>,
    distribution_cache: HashMap<DistrCall, DistrResult>,
    var_values: HashMap<String, LiteralRef>,
    var_order: Vec<String>,
    labels: Vec<ProbLabel>,
    label_index: HashMap<ProbLabel, usize>,
    label_polys: Vec<Vec<Term>>,
    proved: Vec<ProbLabel>,
    stats: SolveStats,
}

pub struct ProofEnv<M, S> {
    state: EnvState<M>,
    stage: S,
}

impl<M, S: std::fmt::Debug> std::fmt::Debug for ProofEnv<M, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofEnv")
            .field("stage", &self.stage)
            .field("labels", &self.state.labels.len())
            .field("bound_vars", &self.state.var_order.len())
            .finish()
    }
}

impl<M: Model, S> ProofEnv<M, S> {
    pub fn config(&self) -> &SolverConfig {
        &self.state.config
    }

    pub fn stats(&self) -> &SolveStats {
        &self.state.stats
    }

    /// Labels with at least one proof, in order of first appearance.
    pub fn labels(&self) -> &[ProbLabel] {
        &self.state.labels
    }

    /// Current binding of a proof variable.
    pub fn var_value(&self, name: &str) -> Option<LiteralRef> {
        self.state.var_values.get(name).copied()
    }

    fn advance<T>(self, stage: T) -> ProofEnv<M, T> {
        ProofEnv {
            state: self.state,
            stage,
        }
    }
}

// ============================================================================
// Unstarted: unification and expansion
// ============================================================================

impl<M: Model> ProofEnv<M, Unstarted> {
    pub fn new(model: M, config: SolverConfig) -> Self {
        Self {
            state: EnvState {
                model,
                config,
                canonical_by_form: HashMap::new(),
                canonical_of: HashMap::new(),
                distribution_cache: HashMap::new(),
                var_values: HashMap::new(),
                var_order: Vec::new(),
                labels: Vec::new(),
                label_index: HashMap::new(),
                label_polys: Vec::new(),
                proved: Vec::new(),
                stats: SolveStats::default(),
            },
            stage: Unstarted,
        }
    }

    /// Substitute a bound proof variable; everything else is returned as is.
    pub fn resolve_value(&self, value: &Value) -> Value {
        self.state.resolve_value(value)
    }

    pub fn resolve_call(&self, call: &DistrCall) -> DistrCall {
        self.state.resolve_call(call)
    }

    /// Unify a proof-side value with a Model-side value, binding proof
    /// variables. Conflicts name `label`.
    pub fn unify(
        &mut self,
        label: &ProbLabel,
        proof_value: &Value,
        model_value: &Value,
    ) -> Result<()> {
        self.state.unify(label, proof_value, model_value)
    }

    pub fn unify_calls(
        &mut self,
        label: &ProbLabel,
        proof_call: &DistrCall,
        model_call: &DistrCall,
    ) -> Result<()> {
        self.state.unify_calls(label, proof_call, model_call)
    }

    /// Check one alternative's sub-labels against `distribution` and the label's result.
    pub fn verify_call_labels(
        &mut self,
        label: &ProbLabel,
        distribution: &Distribution,
        sub_labels: &[ProbLabel],
    ) -> Result<()> {
        self.state.verify_call_labels(label, distribution, sub_labels)
    }

    /// Expand one proof and return its canonical label.
    pub fn expand_proof(&mut self, proof: &Proof) -> Result<ProbLabel> {
        self.state.expand_proof(proof)
    }

    /// Expand `proofs` in order. Proof variables bound by an earlier proof are
    /// visible to later ones.
    pub fn expand_proof_system(mut self, proofs: &[Proof]) -> Result<ProofEnv<M, Expanded>> {
        for proof in proofs {
            self.expand_proof(proof)?;
        }
        Ok(self.finish_expansion())
    }

    pub fn finish_expansion(self) -> ProofEnv<M, Expanded> {
        self.advance(Expanded)
    }
}

impl<M: Model> EnvState<M> {
    fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::ProofVar(name) => match self.var_values.get(name) {
                Some(r) => Value::Literal(*r),
                None => value.clone(),
            },
            _ => value.clone(),
        }
    }

    fn resolve_call(&self, call: &DistrCall) -> DistrCall {
        DistrCall::new(
            call.function.clone(),
            call.parameters.iter().map(|p| self.resolve_value(p)),
        )
    }

    /// First handle seen with the same marshalled form as `reference`.
    fn canonical(&mut self, reference: LiteralRef) -> Result<LiteralRef> {
        if let Some(r) = self.canonical_of.get(&reference) {
            return Ok(*r);
        }
        let form = serde_json::to_string(&self.model.to_external(reference)?)?;
        let canonical = *self.canonical_by_form.entry(form).or_insert(reference);
        self.canonical_of.insert(reference, canonical);
        Ok(canonical)
    }

    fn describe(&mut self, reference: LiteralRef) -> String {
        match self.model.to_external(reference) {
            Ok(v) => format!("{v} ({reference})"),
            Err(_) => reference.to_string(),
        }
    }

    fn bind_var(&mut self, name: &str, reference: LiteralRef) -> Result<()> {
        let reference = self.canonical(reference)?;
        tracing::trace!(var = %name, value = %reference, "bound proof variable");
        self.var_values.insert(name.to_string(), reference);
        self.var_order.push(name.to_string());
        Ok(())
    }

    fn unify(&mut self, label: &ProbLabel, proof_value: &Value, model_value: &Value) -> Result<()> {
        let p = self.resolve_value(proof_value);
        let m = self.resolve_value(model_value);
        match (&p, &m) {
            (Value::Literal(a), Value::Literal(b)) => {
                if a == b || self.model.is_equal(*a, *b)? {
                    Ok(())
                } else {
                    let (a, b) = (self.describe(*a), self.describe(*b));
                    Err(ProbError::unification_conflict(
                        label,
                        format!("proof claims {a} where the model has {b}"),
                    ))
                }
            }
            (Value::ProofVar(name), Value::Literal(r)) | (Value::Literal(r), Value::ProofVar(name)) => {
                self.bind_var(name, *r)
            }
            (Value::ProofVar(x), Value::ProofVar(y)) if x == y => Ok(()),
            (Value::ProofVar(_), Value::ProofVar(_)) => Err(ProbError::unification_conflict(
                label,
                format!("cannot unify unbound {p} with unbound {m}"),
            )),
            _ => Err(ProbError::malformed_distribution(format!(
                "cannot unify unresolved {p} with {m}"
            ))),
        }
    }

    fn unify_values(
        &mut self,
        label: &ProbLabel,
        proof_values: &[Value],
        model_values: &[Value],
    ) -> Result<()> {
        if proof_values.len() != model_values.len() {
            return Err(ProbError::unification_conflict(
                label,
                format!(
                    "proof has {} values where the model has {}",
                    proof_values.len(),
                    model_values.len()
                ),
            ));
        }
        for (p, m) in proof_values.iter().zip(model_values) {
            self.unify(label, p, m)?;
        }
        Ok(())
    }

    fn unify_calls(
        &mut self,
        label: &ProbLabel,
        proof_call: &DistrCall,
        model_call: &DistrCall,
    ) -> Result<()> {
        if proof_call.function != model_call.function {
            return Err(ProbError::unification_conflict(
                label,
                format!("proof calls `{proof_call}` where the model calls `{model_call}`"),
            ));
        }
        self.unify_values(label, &proof_call.parameters, &model_call.parameters)
    }

    fn verify_call_labels(
        &mut self,
        label: &ProbLabel,
        distribution: &Distribution,
        sub_labels: &[ProbLabel],
    ) -> Result<()> {
        if sub_labels.len() != distribution.assignments().len() {
            return Err(ProbError::malformed_proof(
                label,
                format!(
                    "{} sub-labels for a distribution with {} calls",
                    sub_labels.len(),
                    distribution.assignments().len()
                ),
            ));
        }
        let mut bindings: Bindings<'_, Value> = Bindings::new(distribution);
        for sub in sub_labels {
            let Some(assignment) = bindings.next_assignment() else {
                break;
            };
            let call = bindings.resolve_call(&assignment.call)?;
            // trivially equal for sub-labels built by derive_sub_labels
            self.unify_calls(label, &sub.call, &call)?;
            bindings.bind(sub.result.clone())?;
        }
        let result = bindings.resolve_result()?;
        self.unify_values(label, &label.result, &result)
    }

    /// Replace proof variables and canonicalize literals; any unbound
    /// proof variable is a malformed proof.
    fn ground_values(&mut self, label: &ProbLabel, values: &[Value]) -> Result<Vec<Value>> {
        values
            .iter()
            .map(|v| match self.resolve_value(v) {
                Value::Literal(r) => Ok(Value::Literal(self.canonical(r)?)),
                other => Err(ProbError::malformed_proof(
                    label,
                    format!("{other} is not bound to a literal"),
                )),
            })
            .collect()
    }

    fn ground_label(&mut self, label: &ProbLabel, sub: &ProbLabel) -> Result<ProbLabel> {
        let parameters = self.ground_values(label, &sub.call.parameters)?;
        let result = self.ground_values(label, &sub.result)?;
        Ok(ProbLabel::new(
            DistrCall::new(sub.call.function.clone(), parameters),
            result,
        ))
    }

    fn get_distribution(&mut self, call: &DistrCall) -> Result<DistrResult> {
        if let Some(cached) = self.distribution_cache.get(call) {
            self.stats.cache_hits += 1;
            return Ok(cached.clone());
        }
        let result = self.model.get_distribution(call)?;
        self.stats.model_queries += 1;
        self.stats.model_time += result.time;
        tracing::debug!(call = %call, time = result.time, "distribution cache miss");
        self.distribution_cache.insert(call.clone(), result.clone());
        Ok(result)
    }

    /// Sub-labels of one alternative: each assignment's call with earlier
    /// variables substituted from `mapping`, returning `mapping[variables]`.
    fn derive_sub_labels(
        &self,
        label: &ProbLabel,
        distribution: &Distribution,
        mapping: &VariableMapping,
    ) -> Result<Vec<ProbLabel>> {
        let mut bindings: Bindings<'_, Value> = Bindings::new(distribution);
        let mut subs = Vec::with_capacity(distribution.assignments().len());
        while let Some(assignment) = bindings.next_assignment() {
            let call = bindings.resolve_call(&assignment.call)?;
            let result = assignment
                .variables
                .iter()
                .map(|name| {
                    mapping.get(name).cloned().ok_or_else(|| {
                        ProbError::malformed_proof(label, format!("mapping does not bind `{name}`"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            bindings.bind(result.clone())?;
            subs.push(ProbLabel::new(call, result));
        }
        Ok(subs)
    }

    fn check_mapping_names(&self, proof: &Proof, distribution: &Distribution) -> Result<()> {
        if proof.mappings().is_empty() {
            return Ok(());
        }
        let expected: BTreeSet<&str> = distribution.variable_names().collect();
        let actual = proof.variable_names();
        if expected != actual {
            return Err(ProbError::malformed_proof(
                proof.label(),
                format!("mappings bind {actual:?} but the distribution binds {expected:?}"),
            ));
        }
        Ok(())
    }

    fn expand_proof(&mut self, proof: &Proof) -> Result<ProbLabel> {
        let label = proof.label();
        let parameters = self.ground_values(label, &label.call.parameters)?;
        let call = DistrCall::new(label.call.function.clone(), parameters);
        tracing::debug!(
            label = %label,
            alternatives = proof.mappings().len(),
            "expanding proof"
        );

        if call.is_primitive() {
            if !proof.mappings().is_empty() {
                return Err(ProbError::malformed_proof(
                    label,
                    "a primitive label takes no mappings",
                ));
            }
            let result = self.ground_values(label, &label.result)?;
            let grounded = ProbLabel::new(call, result);
            self.add_terms(&grounded, vec![vec![grounded.clone()]])?;
            self.proved.push(grounded.clone());
            return Ok(grounded);
        }

        let distribution = self.get_distribution(&call)?.distribution;
        self.check_mapping_names(proof, &distribution)?;

        let mut alternatives: Vec<Term> = Vec::with_capacity(proof.mappings().len());
        for mapping in proof.mappings() {
            let subs = self.derive_sub_labels(label, &distribution, mapping)?;
            self.verify_call_labels(label, &distribution, &subs)?;
            let grounded = subs
                .iter()
                .map(|s| self.ground_label(label, s))
                .collect::<Result<Vec<_>>>()?;
            alternatives.push(grounded);
        }

        let result = self.ground_values(label, &label.result)?;
        let grounded = ProbLabel::new(call, result);
        self.add_terms(&grounded, alternatives)?;
        self.proved.push(grounded.clone());
        Ok(grounded)
    }

    fn add_terms(&mut self, label: &ProbLabel, terms: Vec<Term>) -> Result<()> {
        let index = match self.label_index.get(label) {
            Some(&i) => i,
            None => {
                let i = self.labels.len();
                self.labels.push(label.clone());
                self.label_index.insert(label.clone(), i);
                self.label_polys.push(Vec::new());
                i
            }
        };
        let mut all = self.label_polys[index].clone();
        all.extend(terms);
        check_disjoint(label, all.iter().collect(), 0)?;
        self.label_polys[index] = all;
        Ok(())
    }
}

/// Alternatives are disjoint if, at the first position where they disagree,
/// their sub-label results differ. Grouping by canonical result is grouping
/// by marshalled result.
fn check_disjoint(label: &ProbLabel, candidates: Vec<&Term>, position: usize) -> Result<()> {
    if candidates.len() <= 1 {
        return Ok(());
    }
    let mut groups: Vec<(&[Value], Vec<&Term>)> = Vec::new();
    for term in candidates {
        let Some(sub) = term.get(position) else {
            return Err(ProbError::AmbiguousProof {
                label: label.to_string(),
                reason: format!(
                    "alternatives agree on all {position} sub-labels and may describe the same execution"
                ),
            });
        };
        match groups.iter_mut().find(|(r, _)| *r == sub.result.as_slice()) {
            Some((_, group)) => group.push(term),
            None => groups.push((sub.result.as_slice(), vec![term])),
        }
    }
    for (_, group) in groups {
        check_disjoint(label, group, position + 1)?;
    }
    Ok(())
}

// ============================================================================
// Expanded: graph sort
// ============================================================================

impl<M: Model> ProofEnv<M, Expanded> {
    /// Build the label dependency graph and decompose it.
    pub fn sort(mut self) -> ProofEnv<M, Sorted> {
        let state = &mut self.state;
        let mut graph = DependencyGraph::new(state.labels.len());
        for (i, terms) in state.label_polys.iter().enumerate() {
            for sub in terms.iter().flatten() {
                if sub.is_primitive() {
                    continue;
                }
                if let Some(&j) = state.label_index.get(sub) {
                    graph.add_edge(i, j);
                }
            }
        }
        let components = graph.strongly_connected_components();
        state.stats.labels = state.labels.len();
        state.stats.components = components.len();
        state.stats.recursive_components = components
            .iter()
            .filter(|c| graph.is_recursive(c))
            .count();
        tracing::debug!(
            labels = state.stats.labels,
            components = state.stats.components,
            recursive = state.stats.recursive_components,
            "sorted label graph"
        );
        self.advance(Sorted { graph, components })
    }
}

// ============================================================================
// Sorted: solving
// ============================================================================

impl<M: Model> ProofEnv<M, Sorted> {
    /// Components in topological order (dependents first).
    pub fn components(&self) -> Vec<Vec<&ProbLabel>> {
        self.stage
            .components
            .iter()
            .map(|c| c.iter().map(|&i| &self.state.labels[i]).collect())
            .collect()
    }

    pub fn solve(mut self) -> Result<ProofEnv<M, Solved>> {
        let polys = self.state.numeric_polys()?;
        let mut log_probs = vec![f64::NEG_INFINITY; self.state.labels.len()];
        for component in self.stage.components.iter().rev() {
            let recursive = self.stage.graph.is_recursive(component);
            self.state
                .solve_component(component, recursive, &polys, &mut log_probs)?;
        }
        Ok(self.advance(Solved { log_probs }))
    }
}

impl<M: Model> EnvState<M> {
    fn primitive_log_prob(&mut self, label: &ProbLabel) -> Result<f64> {
        let [Value::Literal(p)] = label.call.parameters.as_slice() else {
            return Err(ProbError::invalid_parameter(
                &label.call,
                "expected one literal probability",
            ));
        };
        let probability = read_probability(&mut self.model, &label.call, *p)?;
        let [Value::Literal(r)] = label.result.as_slice() else {
            return Err(ProbError::invalid_parameter(
                &label.call,
                format!("a coin flip returns one value, not {}", label.result.len()),
            ));
        };
        match self.model.to_external(*r)?.as_bool() {
            Some(true) => Ok(probability.ln()),
            Some(false) => Ok((-probability).ln_1p()),
            None => Err(ProbError::invalid_parameter(
                &label.call,
                format!("result {} is not boolean", self.describe(*r)),
            )),
        }
    }

    /// Fold primitive sub-labels into coefficients; keep proved labels as deps.
    fn numeric_polys(&mut self) -> Result<Vec<Vec<NumericTerm>>> {
        let mut primitive_cache: HashMap<ProbLabel, f64> = HashMap::new();
        let polys = std::mem::take(&mut self.label_polys);
        let mut numeric = Vec::with_capacity(polys.len());
        for terms in &polys {
            let mut label_terms = Vec::with_capacity(terms.len());
            for term in terms {
                let mut log_coeff = 0.0;
                let mut deps = Vec::new();
                for sub in term {
                    if sub.is_primitive() {
                        let lp = match primitive_cache.get(sub) {
                            Some(lp) => *lp,
                            None => {
                                let lp = self.primitive_log_prob(sub)?;
                                primitive_cache.insert(sub.clone(), lp);
                                lp
                            }
                        };
                        log_coeff += lp;
                    } else if let Some(&j) = self.label_index.get(sub) {
                        deps.push(j);
                    } else {
                        // no proof: this path contributes nothing
                        log_coeff = f64::NEG_INFINITY;
                    }
                }
                label_terms.push(NumericTerm { log_coeff, deps });
            }
            numeric.push(label_terms);
        }
        self.label_polys = polys;
        Ok(numeric)
    }

    fn solve_component(
        &mut self,
        component: &[usize],
        recursive: bool,
        polys: &[Vec<NumericTerm>],
        log_probs: &mut [f64],
    ) -> Result<()> {
        if !recursive {
            for &i in component {
                let value = label_log_prob(&polys[i], log_probs);
                log_probs[i] = value;
            }
            self.stats.passes += 1;
            return Ok(());
        }

        let mut passes = 0;
        loop {
            if let Some(max) = self.config.max_passes {
                if passes >= max {
                    return Err(ProbError::DidNotConverge {
                        label: self.labels[component[0]].to_string(),
                        passes,
                    });
                }
            }
            passes += 1;
            let mut max_increase: f64 = 0.0;
            for &i in component {
                let new = label_log_prob(&polys[i], log_probs);
                let increase = if new == f64::NEG_INFINITY {
                    0.0
                } else {
                    (new - log_probs[i]).max(0.0)
                };
                max_increase = max_increase.max(increase);
                log_probs[i] = log_probs[i].max(new);
            }
            tracing::trace!(pass = passes, max_increase, "solver pass");
            if max_increase <= self.config.tolerance {
                break;
            }
        }
        self.stats.passes += passes;
        tracing::debug!(
            labels = component.len(),
            passes,
            "solved recursive component"
        );
        Ok(())
    }
}

// ============================================================================
// Solved: results
// ============================================================================

impl<M: Model> ProofEnv<M, Solved> {
    pub fn log_prob(&self, label: &ProbLabel) -> Option<f64> {
        self.state
            .label_index
            .get(label)
            .map(|&i| self.stage.log_probs[i])
    }

    pub fn finalize(self) -> ProofResults {
        let EnvState {
            labels,
            proved,
            var_values,
            var_order,
            stats,
            ..
        } = self.state;
        let labels = labels
            .into_iter()
            .zip(self.stage.log_probs)
            .map(|(label, log_prob)| LabelProbability { label, log_prob })
            .collect();
        let bindings = var_order
            .into_iter()
            .filter_map(|name| {
                var_values
                    .get(&name)
                    .map(|&value| ProofVarBinding { name, value })
            })
            .collect();
        ProofResults {
            labels,
            proved,
            bindings,
            stats,
        }
    }
}

/// Expand, sort, solve and finalize `proofs` in one go.
pub fn solve_proof_system<M: Model>(
    model: M,
    proofs: &[Proof],
    config: SolverConfig,
) -> Result<ProofResults> {
    let results = ProofEnv::new(model, config)
        .expand_proof_system(proofs)?
        .sort()
        .solve()?
        .finalize();
    Ok(results)
}
