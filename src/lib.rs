//! Server-side protocol core for CTCP, a change-data-capture control/data
//! protocol.
//!
//! A remote client opens a TCP connection, negotiates a control session,
//! spawns one or more job sessions that each register a set of tables for
//! capture, then asks the server to stream committed row mutations for those
//! tables until stopped. This crate implements the protocol core: wire
//! framing, request/response dispatch, validation, the session/job state
//! machine's wire-visible edges, and serialization of captured log records
//! into fragmented data responses.
//!
//! The session registry, log-mining backend, and transport are pluggable via
//! the [`session`], [`logcapture`] and [`link`] traits respectively; this
//! crate ships reference in-memory implementations of each.

#![cfg_attr(test, expect(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    reason = "test code favours directness over production hygiene"
))]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod handlers;
pub mod link;
pub mod logcapture;
pub mod logging;
pub mod opcode;
pub mod server;
pub mod session;
pub mod streamer;
pub mod validator;

pub use error::CtcpError;
pub use frame::ProtocolHeader;
