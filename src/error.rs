//! Error taxonomy for the protocol core.
//!
//! Three tiers, matching the error-handling design: silent drop
//! ([`FrameError`] variants the dispatcher swallows without a reply),
//! wire-reported (ordinary [`crate::opcode::ResultCode`] values on a
//! response frame, not an error at the Rust level), and connection-fatal
//! ([`CtcpError`]).

use thiserror::Error;

/// Failures decoding a [`crate::frame::ProtocolHeader`] from the wire.
///
/// Every variant here is a *silent drop*: the dispatcher logs it and reads
/// the next frame without responding, because the peer may be stale,
/// attacking, or simply out of sync.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// `op_id` is not within either valid opcode range.
    #[error("op_id {0} out of range")]
    OpIdOutOfRange(u8),
    /// `op_id` names a result-side opcode; the server never accepts those.
    #[error("op_id {0} is a result opcode, not a request opcode")]
    ResultOpcodeAsRequest(u8),
    /// `protocol_version` did not match [`crate::frame::NEGOTIATED_VERSION`].
    #[error("protocol version mismatch: got {0:#010x}")]
    VersionMismatch(u32),
    /// The link did not have 16 bytes available for a header.
    #[error("short header: need 16 bytes, buffer held {0}")]
    ShortHeader(usize),
}

/// Failures validating a decoded header's fields against its opcode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// `op_param` is outside the domain this opcode allows.
    #[error("op_param {param} invalid for op_id {op_id}")]
    InvalidOpParam {
        /// The opcode the parameter was checked against.
        op_id: u8,
        /// The out-of-domain parameter value.
        param: u8,
    },
    /// `job_desc` is zero or exceeds `JOB_COUNT_PER_GROUP_MAX`.
    #[error("job_desc {0} out of range")]
    InvalidJobDesc(u16),
}

/// Connection-fatal errors: the connection is closed, but the session
/// group survives (the client may reconnect and reuse its SGID).
#[derive(Debug, Error)]
pub enum CtcpError {
    /// The link produced an I/O error.
    #[error("link io error: {0}")]
    Io(#[from] std::io::Error),
    /// `link.recv` exceeded `RECV_TIMEOUT_MAX`.
    #[error("recv timed out")]
    Timeout,
    /// The write buffer could not hold a header or payload being emitted.
    #[error("write buffer overflow")]
    BufferOverflow,
    /// A single capture item exceeded `PACKET_DATA_MAX_LEN` on its own.
    #[error("oversized capture item for table {table_name}")]
    OversizedItem {
        /// The table whose row produced the oversized item.
        table_name: String,
    },
}
