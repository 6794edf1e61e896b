//! Client side: a Model that forwards every operation to a remote server.

use crate::protocol::{decode_reply, Command};
use algprob_model::{DistrCall, DistrResult, LiteralRef, Model, ProbError, Result};
use serde::de::DeserializeOwned;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// Sends one request line and returns the reply line.
pub trait Transport {
    fn exchange(&mut self, request: &str) -> Result<String>;
}

/// Newline-delimited requests over a byte stream.
#[derive(Debug)]
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
}

pub type TcpTransport = LineTransport<BufReader<TcpStream>, TcpStream>;

impl<R: BufRead, W: Write> LineTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;
        let reader = BufReader::new(stream.try_clone().map_err(io_error)?);
        Ok(Self::new(reader, stream))
    }
}

impl<R: BufRead, W: Write> Transport for LineTransport<R, W> {
    fn exchange(&mut self, request: &str) -> Result<String> {
        self.writer
            .write_all(request.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .map_err(io_error)?;
        let mut reply = String::new();
        let n = self.reader.read_line(&mut reply).map_err(io_error)?;
        if n == 0 {
            return Err(ProbError::protocol("connection closed before reply"));
        }
        Ok(reply)
    }
}

fn io_error(err: std::io::Error) -> ProbError {
    ProbError::protocol(err.to_string())
}

/// Proxy Model: every trait method is one request/reply exchange.
#[derive(Debug)]
pub struct RemoteModel<T> {
    transport: T,
}

impl RemoteModel<TcpTransport> {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self::new(TcpTransport::connect(addr)?))
    }
}

impl<T: Transport> RemoteModel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn request<V: DeserializeOwned>(&mut self, command: &Command) -> Result<V> {
        let line = command.encode()?;
        tracing::trace!(command = command.name(), "sending request");
        let reply = self.transport.exchange(&line)?;
        let value = decode_reply(&reply)?;
        serde_json::from_value(value).map_err(|e| {
            ProbError::protocol(format!("unexpected reply to {}: {e}", command.name()))
        })
    }
}

impl<T: Transport> Model for RemoteModel<T> {
    fn get_distribution(&mut self, call: &DistrCall) -> Result<DistrResult> {
        self.request(&Command::GetDistribution(call.clone()))
    }

    fn modify_reference_count(&mut self, reference: LiteralRef, delta: i64) -> Result<()> {
        self.request(&Command::ModifyReferenceCount { reference, delta })
    }

    fn to_external(&mut self, reference: LiteralRef) -> Result<serde_json::Value> {
        self.request(&Command::ToExternal(reference))
    }

    fn from_external(&mut self, value: serde_json::Value) -> Result<LiteralRef> {
        self.request(&Command::FromExternal(value))
    }

    fn is_equal(&mut self, a: LiteralRef, b: LiteralRef) -> Result<bool> {
        self.request(&Command::IsEqual(a, b))
    }
}
