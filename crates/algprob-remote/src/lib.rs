//! Remote Model protocol.
//!
//! A Model can live in another process. `RemoteModel` implements the Model
//! contract by sending one command line per operation; `ModelServer` answers
//! those lines from any local Model. See `protocol` for the wire format.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{LineTransport, RemoteModel, TcpTransport, Transport};
pub use protocol::{decode_reply, encode_reply, Command};
pub use server::ModelServer;
