//! Wire format: one command per line, one JSON reply per line.
//!
//! ```text
//! getDistribution {"function":"f","parameters":[{"type":"literal","ref":2}]}
//! modifyReferenceCount {"ref":{"type":"literal","ref":2},"delta":-1}
//! fromExternal 0.5
//! toExternal {"type":"literal","ref":2}
//! isEqual [{"type":"literal","ref":2},{"type":"literal","ref":3}]
//! ```
//!
//! A failed command replies `{"$error": <ProbError>}` where the error is
//! tagged by `kind`. The `$error` key is reserved: a host-neutral value shaped
//! like an error reply cannot cross the wire.

use algprob_model::{DistrCall, LiteralRef, ProbError, Result};
use serde::{Deserialize, Serialize};

pub const GET_DISTRIBUTION: &str = "getDistribution";
pub const MODIFY_REFERENCE_COUNT: &str = "modifyReferenceCount";
pub const FROM_EXTERNAL: &str = "fromExternal";
pub const TO_EXTERNAL: &str = "toExternal";
pub const IS_EQUAL: &str = "isEqual";

pub const ERROR_KEY: &str = "$error";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetDistribution(DistrCall),
    ModifyReferenceCount { reference: LiteralRef, delta: i64 },
    FromExternal(serde_json::Value),
    ToExternal(LiteralRef),
    IsEqual(LiteralRef, LiteralRef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReferenceDelta {
    #[serde(rename = "ref")]
    reference: LiteralRef,
    delta: i64,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetDistribution(_) => GET_DISTRIBUTION,
            Command::ModifyReferenceCount { .. } => MODIFY_REFERENCE_COUNT,
            Command::FromExternal(_) => FROM_EXTERNAL,
            Command::ToExternal(_) => TO_EXTERNAL,
            Command::IsEqual(..) => IS_EQUAL,
        }
    }

    /// Render as one line, without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        let args = match self {
            Command::GetDistribution(call) => serde_json::to_string(call)?,
            Command::ModifyReferenceCount { reference, delta } => {
                serde_json::to_string(&ReferenceDelta {
                    reference: *reference,
                    delta: *delta,
                })?
            }
            Command::FromExternal(value) => serde_json::to_string(value)?,
            Command::ToExternal(reference) => serde_json::to_string(reference)?,
            Command::IsEqual(a, b) => serde_json::to_string(&[a, b])?,
        };
        Ok(format!("{} {}", self.name(), args))
    }

    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (name, args) = line
            .split_once(' ')
            .ok_or_else(|| ProbError::protocol(format!("missing arguments in `{line}`")))?;
        let command = match name {
            GET_DISTRIBUTION => Command::GetDistribution(serde_json::from_str(args)?),
            MODIFY_REFERENCE_COUNT => {
                let ReferenceDelta { reference, delta } = serde_json::from_str(args)?;
                Command::ModifyReferenceCount { reference, delta }
            }
            FROM_EXTERNAL => Command::FromExternal(serde_json::from_str(args)?),
            TO_EXTERNAL => Command::ToExternal(serde_json::from_str(args)?),
            IS_EQUAL => {
                let [a, b]: [LiteralRef; 2] = serde_json::from_str(args)?;
                Command::IsEqual(a, b)
            }
            other => {
                return Err(ProbError::protocol(format!("unknown command `{other}`")));
            }
        };
        Ok(command)
    }
}

/// Render a command outcome as one reply line, without the trailing newline.
pub fn encode_reply(outcome: &Result<serde_json::Value>) -> String {
    let reply = match outcome {
        Ok(value) => serde_json::to_string(value),
        Err(err) => {
            let mut object = serde_json::Map::new();
            object.insert(
                ERROR_KEY.to_string(),
                serde_json::to_value(err).unwrap_or(serde_json::Value::Null),
            );
            serde_json::to_string(&serde_json::Value::Object(object))
        }
    };
    // serializing a `serde_json::Value` cannot fail
    reply.unwrap_or_else(|_| "null".to_string())
}

/// Parse a reply line, turning an error reply back into its `ProbError`.
pub fn decode_reply(line: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(line.trim_end())?;
    if let Some(object) = value.as_object() {
        if object.len() == 1 {
            if let Some(err) = object.get(ERROR_KEY) {
                let err: ProbError = serde_json::from_value(err.clone()).map_err(|e| {
                    ProbError::protocol(format!("unreadable error reply {err}: {e}"))
                })?;
                return Err(err);
            }
        }
    }
    Ok(value)
}
