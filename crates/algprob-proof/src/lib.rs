//! Proofs over distribution functions and their exact evaluation.
//!
//! A proof claims that a call returns a specific result and lists the
//! mutually exclusive execution paths that produce it. Evaluating a set of
//! proofs yields a lower bound on each claimed event's probability, including
//! events defined through mutually recursive functions.
//!
//! - `proof`: labels, variable mappings and proofs,
//! - `graphsort`: strongly connected components in topological order,
//! - `proof_env`: the evaluator (unify, expand, sort, solve),
//! - `external`: the host-neutral proof file format.

pub mod external;
pub mod graphsort;
pub mod proof;
pub mod proof_env;

pub use external::{
    export_label, import_proofs, load_proofs, parse_proofs, ExternalLabel, ExternalProof,
};
pub use graphsort::{sort_graph, DependencyGraph};
pub use proof::{ProbLabel, Proof, VariableMapping};
pub use proof_env::{
    log_sum_exp, solve_proof_system, Expanded, LabelProbability, ProofEnv, ProofResults,
    ProofVarBinding, SolveStats, Solved, SolverConfig, Sorted, Unstarted, DEFAULT_TOLERANCE,
};
