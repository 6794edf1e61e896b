//! Server side: exposes any Model over a line-oriented stream.
//!
//! Connections are served one at a time against a single Model, in the order
//! they are accepted.

use crate::protocol::{encode_reply, Command};
use algprob_model::{Model, Result};
use anyhow::Context;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

#[derive(Debug)]
pub struct ModelServer<M> {
    model: M,
}

impl<M: Model> ModelServer<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }

    /// Run one command against the Model and encode its reply value.
    pub fn dispatch(&mut self, command: Command) -> Result<serde_json::Value> {
        let reply = match command {
            Command::GetDistribution(call) => {
                serde_json::to_value(self.model.get_distribution(&call)?)?
            }
            Command::ModifyReferenceCount { reference, delta } => {
                self.model.modify_reference_count(reference, delta)?;
                serde_json::Value::Null
            }
            Command::FromExternal(value) => serde_json::to_value(self.model.from_external(value)?)?,
            Command::ToExternal(reference) => self.model.to_external(reference)?,
            Command::IsEqual(a, b) => serde_json::Value::Bool(self.model.is_equal(a, b)?),
        };
        Ok(reply)
    }

    /// Decode, run and answer one request line. Never fails: errors become
    /// error replies.
    pub fn handle_line(&mut self, line: &str) -> String {
        let outcome = Command::decode(line).and_then(|command| {
            let name = command.name();
            self.dispatch(command).map_err(|err| {
                tracing::warn!(command = name, error = %err, "command failed");
                err
            })
        });
        if let Err(err) = &outcome {
            tracing::debug!(kind = err.kind(), "sending error reply");
        }
        encode_reply(&outcome)
    }

    /// Answer requests until the reader is exhausted. Returns the number of
    /// requests handled.
    pub fn serve_connection<R: BufRead, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> anyhow::Result<usize> {
        let mut handled = 0;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .context("failed to read request")?;
            if n == 0 {
                return Ok(handled);
            }
            if line.trim().is_empty() {
                continue;
            }
            let reply = self.handle_line(&line);
            writer
                .write_all(reply.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .and_then(|_| writer.flush())
                .context("failed to write reply")?;
            handled += 1;
        }
    }

    /// Accept and serve exactly one connection.
    pub fn accept_one(&mut self, listener: &TcpListener) -> anyhow::Result<usize> {
        let (stream, peer) = listener.accept().context("accept failed")?;
        tracing::info!(peer = %peer, "connection accepted");
        let reader = BufReader::new(stream.try_clone().context("failed to clone stream")?);
        let handled = self.serve_connection(reader, stream)?;
        tracing::info!(peer = %peer, requests = handled, "connection closed");
        Ok(handled)
    }

    /// Serve connections forever. A failing connection is logged and dropped.
    pub fn serve(&mut self, listener: &TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr().context("failed to read bound addr")?;
        tracing::info!(addr = %addr, "model server listening");
        loop {
            if let Err(err) = self.accept_one(listener) {
                tracing::warn!(error = %format!("{err:#}"), "connection error");
            }
        }
    }
}
