//! The 16-byte `ProtocolHeader` and the write-cursor primitive the capture
//! streamer uses to backfill length prefixes.
//!
//! All multi-byte integers are little-endian on the wire (see §6.1 of the
//! design document this crate implements); that is the opposite of the
//! teacher crate's Hotline framing, which is big-endian, so every primitive
//! write/read here is explicit about it.

#![allow(clippy::little_endian_bytes, reason = "wire protocol is little-endian")]

use crate::error::FrameError;
use crate::validator;

/// Byte length of a `ProtocolHeader` on the wire.
pub const HEADER_LEN: usize = 16;

/// Protocol version this build negotiates. Packed as `{major, minor,
/// patch, tag}`, one byte each, little-endian.
pub const NEGOTIATED_VERSION: u32 = pack_version(1, 0, 0, 0);

/// Pack four version components into the wire's `protocol_version` field.
#[must_use]
pub const fn pack_version(major: u8, minor: u8, patch: u8, tag: u8) -> u32 {
    u32::from_le_bytes([major, minor, patch, tag])
}

/// The fixed 16-byte header prefixing every CTCP frame.
///
/// `op_param` serves double duty: on a request frame it carries the
/// operation-specific parameter, on a response frame it carries the wire
/// [`crate::opcode::ResultCode`] byte. This mirrors the original protocol,
/// which writes the same header field for both purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Operation code identifying the request or response kind.
    pub op_id: u8,
    /// Operation-specific parameter (request) or result code (response).
    pub op_param: u8,
    /// Job descriptor this frame concerns, or `0` for none.
    pub job_desc: u16,
    /// Session group id, or `0` before one has been assigned.
    pub session_group_id: u32,
    /// Packed protocol version; must equal [`NEGOTIATED_VERSION`] to be
    /// accepted.
    pub protocol_version: u32,
    /// Byte length of the payload following this header.
    pub data_len: u32,
}

impl ProtocolHeader {
    /// Parse a header from an exactly-16-byte slice.
    ///
    /// This performs no semantic validation (opcode range, version); call
    /// [`decode_header`] for that.
    #[must_use]
    pub const fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            op_id: buf[0],
            op_param: buf[1],
            job_desc: u16::from_le_bytes([buf[2], buf[3]]),
            session_group_id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            protocol_version: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            data_len: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    /// Serialize this header to its 16-byte wire form.
    pub fn write_bytes(&self, buf: &mut [u8; HEADER_LEN]) {
        buf[0] = self.op_id;
        buf[1] = self.op_param;
        buf[2..4].copy_from_slice(&self.job_desc.to_le_bytes());
        buf[4..8].copy_from_slice(&self.session_group_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.protocol_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.data_len.to_le_bytes());
    }

    /// Serialize to a freshly allocated 16-byte array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        self.write_bytes(&mut buf);
        buf
    }
}

/// Build a response (or request) header, resetting the implicit write
/// cursor semantics by always producing a self-contained 16-byte value.
///
/// Fails with [`FrameError::OpIdOutOfRange`] if `op_id` is not in either
/// valid opcode range; the wire format has no room to express an invalid
/// opcode, so this is caught before the bytes are ever written.
///
/// # Errors
///
/// Returns [`FrameError::OpIdOutOfRange`] if `op_id` fails
/// [`validator::opid_in_range`].
pub fn encode_header(
    op_id: u8,
    op_param: u8,
    job_desc: u16,
    session_group_id: u32,
    data_len: u32,
) -> Result<ProtocolHeader, FrameError> {
    if !validator::opid_in_range(op_id) {
        return Err(FrameError::OpIdOutOfRange(op_id));
    }
    Ok(ProtocolHeader {
        op_id,
        op_param,
        job_desc,
        session_group_id,
        protocol_version: NEGOTIATED_VERSION,
        data_len,
    })
}

/// Decode and generically validate a header read from the link.
///
/// `expected_op_id` lets a caller pin the header to a specific request
/// opcode; pass [`None`] at the dispatcher entry point, where the decoded
/// `op_id` itself determines routing.
///
/// # Errors
///
/// Returns [`FrameError::ShortHeader`] if fewer than [`HEADER_LEN`] bytes
/// are available, [`FrameError::OpIdOutOfRange`] or
/// [`FrameError::ResultOpcodeAsRequest`] if the opcode fails validation,
/// and [`FrameError::VersionMismatch`] if the protocol version does not
/// match [`NEGOTIATED_VERSION`]. All of these are silent-drop conditions.
pub fn decode_header(
    buf: &[u8],
    expected_op_id: Option<u8>,
) -> Result<ProtocolHeader, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::ShortHeader(buf.len()));
    }
    let mut fixed = [0u8; HEADER_LEN];
    fixed.copy_from_slice(&buf[..HEADER_LEN]);
    let header = ProtocolHeader::from_bytes(&fixed);

    let op_id = expected_op_id.unwrap_or(header.op_id);
    if !validator::opid_in_range(op_id) {
        return Err(FrameError::OpIdOutOfRange(op_id));
    }
    if !validator::is_recv_opcode(op_id) {
        return Err(FrameError::ResultOpcodeAsRequest(op_id));
    }
    if !validator::validate_version(header.protocol_version) {
        return Err(FrameError::VersionMismatch(header.protocol_version));
    }
    Ok(header)
}

/// A growable write cursor over a byte buffer, used by the capture
/// streamer to reserve space for a length prefix and backfill it once the
/// payload's true size is known.
#[derive(Debug, Default)]
pub struct WriteCursor {
    buf: Vec<u8>,
    pos: usize,
}

impl WriteCursor {
    /// Create an empty cursor.
    #[must_use]
    pub fn new() -> Self { Self { buf: Vec::new(), pos: 0 } }

    /// Current write position.
    #[must_use]
    pub const fn pos(&self) -> usize { self.pos }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Whether nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Borrow the written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Append bytes at the current position, extending the buffer.
    ///
    /// Fails if the resulting buffer would exceed `max_len`.
    ///
    /// # Errors
    ///
    /// Returns [`CtcpError::BufferOverflow`](crate::error::CtcpError) if
    /// writing would exceed `max_len`.
    pub fn write_bytes(
        &mut self,
        bytes: &[u8],
        max_len: usize,
    ) -> Result<(), crate::error::CtcpError> {
        if self.pos + bytes.len() > max_len {
            return Err(crate::error::CtcpError::BufferOverflow);
        }
        if self.pos == self.buf.len() {
            self.buf.extend_from_slice(bytes);
        } else {
            let end = self.pos + bytes.len();
            if end > self.buf.len() {
                self.buf.resize(end, 0);
            }
            self.buf[self.pos..end].copy_from_slice(bytes);
        }
        self.pos += bytes.len();
        Ok(())
    }

    /// Write a little-endian `u32` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`CtcpError::BufferOverflow`](crate::error::CtcpError) if
    /// writing would exceed `max_len`.
    pub fn write_u32(&mut self, value: u32, max_len: usize) -> Result<(), crate::error::CtcpError> {
        self.write_bytes(&value.to_le_bytes(), max_len)
    }

    /// Move the cursor forward `n` bytes without writing, reserving space
    /// for a later backfill.
    pub fn forward(&mut self, n: usize) {
        let end = self.pos + n;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.pos = end;
    }

    /// Move the cursor back to `pos`, discarding nothing (subsequent
    /// writes overwrite in place); used to rewind to the last successful
    /// item boundary on overflow.
    pub fn rewind_to(&mut self, pos: usize) {
        debug_assert!(pos <= self.buf.len());
        self.buf.truncate(pos);
        self.pos = pos;
    }

    /// Overwrite 4 bytes at `pos` with a little-endian `u32`, without
    /// disturbing the current write position.
    pub fn backfill_u32(&mut self, pos: usize, value: u32) {
        let bytes = value.to_le_bytes();
        self.buf[pos..pos + 4].copy_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::{HEADER_LEN, NEGOTIATED_VERSION, ProtocolHeader, WriteCursor, decode_header, encode_header};
    use crate::opcode::CREATE_CONTROL_SESSION;

    #[test]
    fn header_round_trips() {
        let header = ProtocolHeader {
            op_id: CREATE_CONTROL_SESSION,
            op_param: 0,
            job_desc: 0,
            session_group_id: 0,
            protocol_version: NEGOTIATED_VERSION,
            data_len: 0,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = ProtocolHeader::from_bytes(&bytes);
        assert_eq!(decoded, header);
    }

    #[test]
    fn encode_rejects_opcode_out_of_range() {
        assert!(encode_header(0, 0, 0, 0, 0).is_err());
        assert!(encode_header(255, 0, 0, 0, 0).is_err());
    }

    #[test]
    fn decode_drops_version_mismatch_silently() {
        let mut header = ProtocolHeader {
            op_id: CREATE_CONTROL_SESSION,
            op_param: 0,
            job_desc: 0,
            session_group_id: 0,
            protocol_version: NEGOTIATED_VERSION + 1,
            data_len: 0,
        };
        let bytes = header.to_bytes();
        assert!(decode_header(&bytes, None).is_err());
        header.protocol_version = NEGOTIATED_VERSION;
        let bytes = header.to_bytes();
        assert!(decode_header(&bytes, None).is_ok());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(decode_header(&[0u8; 4], None).is_err());
    }

    #[test]
    fn write_cursor_reserve_and_backfill() {
        let mut cursor = WriteCursor::new();
        let reserved = cursor.pos();
        cursor.forward(4);
        cursor.write_u32(0xAABB_CCDD, 1024).unwrap();
        cursor.backfill_u32(reserved, 7);
        let slice = cursor.as_slice();
        assert_eq!(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]), 7);
    }

    #[test]
    fn write_cursor_rewind_discards_tail() {
        let mut cursor = WriteCursor::new();
        cursor.write_u32(1, 1024).unwrap();
        let checkpoint = cursor.pos();
        cursor.write_u32(2, 1024).unwrap();
        cursor.rewind_to(checkpoint);
        assert_eq!(cursor.len(), checkpoint);
    }
}
