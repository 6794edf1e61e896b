//! Error taxonomy shared by every algprob crate.
//!
//! Every variant is fatal to the enclosing `sample` / proof evaluation: there
//! is no local recovery and no partial result. Variants carry the offending
//! call or label rendered with `Display`, so a failure can be diagnosed without
//! access to the Model's object store.
//!
//! The enum is `Serialize`/`Deserialize` so the remote protocol can ship an
//! error across the wire and rebuild the same variant on the other side.

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, ProbError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbError {
    /// A Distribution or Value violates a structural invariant.
    #[error("malformed distribution: {reason}")]
    MalformedDistribution { reason: String },

    /// A proof's claimed value/call does not match the Model's Distribution.
    #[error("unification conflict in `{label}`: {reason}")]
    UnificationConflict { label: String, reason: String },

    /// Two alternatives of one proof may describe the same execution.
    #[error("ambiguous proof for `{label}`: {reason}")]
    AmbiguousProof { label: String, reason: String },

    #[error("unknown function `{function}`")]
    UnknownFunction { function: String },

    /// A primitive call's probability is outside [0, 1] or its result is not boolean.
    #[error("invalid parameter in `{call}`: {reason}")]
    InvalidParameter { call: String, reason: String },

    /// A proof is not well-shaped (mapping names disagree, unbound proof variables).
    #[error("malformed proof for `{label}`: {reason}")]
    MalformedProof { label: String, reason: String },

    #[error("call `{call}` is not grounded: every parameter must be a literal")]
    UngroundedCall { call: String },

    #[error("unknown or released reference @{reference}")]
    UnknownReference { reference: u64 },

    #[error("reference count of @{reference} would drop to {count}")]
    InvalidReferenceCount { reference: u64, count: i64 },

    #[error("component containing `{label}` did not converge within {passes} passes")]
    DidNotConverge { label: String, passes: usize },

    /// The remote transport failed or the peer sent something unreadable.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("codec error: {message}")]
    Codec { message: String },
}

impl ProbError {
    pub fn malformed_distribution(reason: impl Into<String>) -> Self {
        Self::MalformedDistribution {
            reason: reason.into(),
        }
    }

    pub fn unification_conflict(label: impl ToString, reason: impl Into<String>) -> Self {
        Self::UnificationConflict {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter(call: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            call: call.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed_proof(label: impl ToString, reason: impl Into<String>) -> Self {
        Self::MalformedProof {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Stable snake_case name of the variant (matches the serialized `kind`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedDistribution { .. } => "malformed_distribution",
            Self::UnificationConflict { .. } => "unification_conflict",
            Self::AmbiguousProof { .. } => "ambiguous_proof",
            Self::UnknownFunction { .. } => "unknown_function",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::MalformedProof { .. } => "malformed_proof",
            Self::UngroundedCall { .. } => "ungrounded_call",
            Self::UnknownReference { .. } => "unknown_reference",
            Self::InvalidReferenceCount { .. } => "invalid_reference_count",
            Self::DidNotConverge { .. } => "did_not_converge",
            Self::Protocol { .. } => "protocol",
            Self::Codec { .. } => "codec",
        }
    }
}

impl From<serde_json::Error> for ProbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }
}
