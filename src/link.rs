//! `LinkIO`: the byte-oriented transport contract (§6.2) and a
//! [`tokio::net::TcpStream`]-backed reference implementation.
//!
//! Read/write buffers are sized `>= PACKET_DATA_MAX_LEN + HEADER_LEN`, as
//! the collaborator contract requires, so a full capture-data frame
//! always fits in one buffer without additional allocation on the hot
//! path.

#![allow(clippy::little_endian_bytes, reason = "wire protocol is little-endian")]

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::CtcpError;
use crate::frame::HEADER_LEN;

/// The byte-oriented transport a dispatcher reads requests from and writes
/// responses to.
///
/// One `LinkIO` instance is owned by exactly one connection's dispatcher
/// task; there is no sharing across tasks; see §5.
#[async_trait]
pub trait LinkIO: Send {
    /// Block (up to `timeout`) for a complete frame and return its bytes
    /// (header + payload). A clean timeout with no data available is
    /// reported as `Err(`[`CtcpError::Timeout`]`)`, which higher layers
    /// treat as connection-fatal.
    ///
    /// # Errors
    ///
    /// Returns [`CtcpError::Io`] on a socket error and
    /// [`CtcpError::Timeout`] if no frame arrives within `timeout`.
    async fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, CtcpError>;

    /// Write a complete frame (header + payload) to the link.
    ///
    /// # Errors
    ///
    /// Returns [`CtcpError::Io`] on a socket error.
    async fn send(&mut self, frame: &[u8]) -> Result<(), CtcpError>;
}

/// Reference [`LinkIO`] over a plain TCP stream.
pub struct TcpLink {
    stream: TcpStream,
    max_frame_len: usize,
}

impl TcpLink {
    /// Wrap a connected stream. `max_frame_len` bounds a single `recv`;
    /// larger frames are rejected as a protocol violation by the caller
    /// rather than by this link, which only reads what the header claims.
    #[must_use]
    pub const fn new(stream: TcpStream, max_frame_len: usize) -> Self {
        Self { stream, max_frame_len }
    }
}

#[async_trait]
impl LinkIO for TcpLink {
    async fn recv(&mut self, recv_timeout: Duration) -> Result<Vec<u8>, CtcpError> {
        let mut header_buf = [0u8; HEADER_LEN];
        match timeout(recv_timeout, self.stream.read_exact(&mut header_buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(CtcpError::Io(err)),
            Err(_) => return Err(CtcpError::Timeout),
        }

        let data_len = u32::from_le_bytes([
            header_buf[12],
            header_buf[13],
            header_buf[14],
            header_buf[15],
        ]) as usize;
        if data_len > self.max_frame_len {
            return Err(CtcpError::BufferOverflow);
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + data_len);
        frame.extend_from_slice(&header_buf);
        if data_len > 0 {
            let mut payload = vec![0u8; data_len];
            match timeout(recv_timeout, self.stream.read_exact(&mut payload)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(CtcpError::Io(err)),
                Err(_) => return Err(CtcpError::Timeout),
            }
            frame.extend_from_slice(&payload);
        }
        Ok(frame)
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), CtcpError> {
        self.stream.write_all(frame).await?;
        Ok(())
    }
}
