//! Algprob distribution substrate.
//!
//! A *distribution function* either is the primitive coin flip (`bernouli p`)
//! or expands, through a [`Model`], into a small program: a sequence of
//! sub-calls whose results feed later sub-calls and a final result.
//!
//! This crate holds everything both the sampler and the proof evaluator need:
//!
//! - `value`: values, calls, distributions and their wire encoding,
//! - `model`: the Model contract and the `CheckedModel` boundary wrapper,
//! - `function_model`: an in-process Model built from Rust closures,
//! - `sample`: Monte Carlo sampling,
//! - `error`: the error taxonomy shared across the workspace.

pub mod error;
pub mod function_model;
pub mod model;
pub mod sample;
pub mod value;

pub use error::{ProbError, Result};
pub use function_model::{Arg, DistributionBuilder, FunctionModel, FunctionModelBuilder};
pub use model::{CheckedModel, Model};
pub use sample::{read_probability, sample, sample_distr};
pub use value::{
    Assignment, Bindings, DistrCall, DistrResult, Distribution, LiteralRef, Value,
    PRIMITIVE_FUNCTION,
};
