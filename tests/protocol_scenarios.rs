//! End-to-end scenarios from the design document's testable-properties
//! section, driven through the public dispatcher/streamer API rather than
//! real sockets (mirroring the teacher crate's `tests/transaction.rs`,
//! which exercises its wire codec directly over an in-memory duplex
//! instead of spinning up a listener).

#![expect(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    clippy::little_endian_bytes,
    reason = "test assertions over a little-endian wire protocol"
)]
#![allow(missing_docs, reason = "integration test, not part of the public API")]

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use ctcp::dispatcher::{self, DispatchOutcome};
use ctcp::error::{CtcpError, FrameError};
use ctcp::frame::{HEADER_LEN, NEGOTIATED_VERSION, ProtocolHeader};
use ctcp::link::LinkIO;
use ctcp::logcapture::{ChannelLogCaptor, Column, LogItem, TransactionLogList};
use ctcp::opcode;
use ctcp::session::{InMemorySessionManager, SessionManager};

/// A queue-backed [`LinkIO`] double: frames are popped off the front of
/// `inbound` in submission order, every write is appended to `outbound`.
struct VecLink {
    inbound: Vec<Vec<u8>>,
    outbound: Mutex<Vec<Vec<u8>>>,
}

impl VecLink {
    fn new(frames: Vec<Vec<u8>>) -> Self {
        let mut inbound = frames;
        inbound.reverse();
        Self { inbound, outbound: Mutex::new(Vec::new()) }
    }

    fn sent(&self) -> Vec<Vec<u8>> { self.outbound.lock().unwrap().clone() }
}

#[async_trait]
impl LinkIO for VecLink {
    async fn recv(&mut self, _timeout: Duration) -> Result<Vec<u8>, CtcpError> {
        self.inbound.pop().ok_or(CtcpError::Timeout)
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), CtcpError> {
        self.outbound.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

fn request(op_id: u8, op_param: u8, job_desc: u16, sgid: u32) -> Vec<u8> {
    request_with_payload(op_id, op_param, job_desc, sgid, &[])
}

fn request_with_payload(op_id: u8, op_param: u8, job_desc: u16, sgid: u32, payload: &[u8]) -> Vec<u8> {
    let header = ProtocolHeader {
        op_id,
        op_param,
        job_desc,
        session_group_id: sgid,
        protocol_version: NEGOTIATED_VERSION,
        data_len: u32::try_from(payload.len()).unwrap(),
    };
    let mut frame = header.to_bytes().to_vec();
    frame.extend_from_slice(payload);
    frame
}

fn register_table_payload(user: &str, table: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&u32::try_from(user.len()).unwrap().to_le_bytes());
    payload.extend_from_slice(user.as_bytes());
    payload.extend_from_slice(&u32::try_from(table.len()).unwrap().to_le_bytes());
    payload.extend_from_slice(table.as_bytes());
    payload
}

fn response_header(frame: &[u8]) -> ProtocolHeader {
    let mut buf = [0u8; HEADER_LEN];
    buf.copy_from_slice(&frame[..HEADER_LEN]);
    ProtocolHeader::from_bytes(&buf)
}

/// Scenario 1: `CREATE_CONTROL_SESSION` with `sgid=0` gets back a fresh,
/// nonzero session group id and `RC_SUCCESS`.
#[tokio::test]
async fn create_control_session_assigns_a_fresh_sgid() -> Result<()> {
    let mgr = InMemorySessionManager::new(8);
    let mut link = VecLink::new(vec![request(opcode::CREATE_CONTROL_SESSION, opcode::CONNECTION_DEFAULT, 0, 0)]);

    let outcome = dispatcher::process_once(&mut link, &mgr, Duration::from_secs(1)).await?;
    assert!(matches!(outcome, DispatchOutcome::Responded(_)));

    let sent = link.sent();
    let header = response_header(&sent[0]);
    assert_eq!(header.op_id, opcode::CREATE_CONTROL_SESSION_RESULT);
    assert_eq!(header.op_param, 0);
    assert!(header.session_group_id > 0);
    Ok(())
}

/// Scenario 2: register, re-register (fails already-exists), unregister,
/// re-unregister (fails not-registered).
#[tokio::test]
async fn register_unregister_table_round_trips_through_dispatch() -> Result<()> {
    let mgr = InMemorySessionManager::new(8);
    let sgid = mgr.create_group().await;
    let jd = mgr.add_job(sgid).await?;
    let payload = register_table_payload("bob", "orders");

    let mut link = VecLink::new(vec![
        request_with_payload(opcode::REGISTER_TABLE, 0, jd, sgid, &payload),
        request_with_payload(opcode::REGISTER_TABLE, 0, jd, sgid, &payload),
        request_with_payload(opcode::UNREGISTER_TABLE, 0, jd, sgid, &payload),
        request_with_payload(opcode::UNREGISTER_TABLE, 0, jd, sgid, &payload),
    ]);

    for _ in 0..4 {
        dispatcher::process_once(&mut link, &mgr, Duration::from_secs(1)).await?;
    }

    let sent = link.sent();
    assert_eq!(response_header(&sent[0]).op_param, 0); // RC_SUCCESS
    assert_eq!(response_header(&sent[1]).op_param, 10); // RC_FAILED_TABLE_ALREADY_EXIST
    assert_eq!(response_header(&sent[2]).op_param, 0); // RC_SUCCESS
    assert_eq!(response_header(&sent[3]).op_param, 11); // RC_FAILED_UNREGISTERED_TABLE
    Ok(())
}

/// Scenario 3: an invalid `op_param` on `STOP_CAPTURE` still gets a
/// well-formed `RC_FAILED` response rather than being silently dropped.
#[tokio::test]
async fn invalid_stop_capture_param_still_gets_a_response() -> Result<()> {
    let mgr = InMemorySessionManager::new(8);
    let mut link = VecLink::new(vec![request(opcode::STOP_CAPTURE, 0xFF, 1, 1)]);

    let outcome = dispatcher::process_once(&mut link, &mgr, Duration::from_secs(1)).await?;
    assert!(matches!(outcome, DispatchOutcome::Responded(None)));

    let sent = link.sent();
    let header = response_header(&sent[0]);
    assert_eq!(header.op_id, opcode::STOP_CAPTURE_RESULT);
    assert_eq!(header.op_param, 2); // RC_FAILED
    Ok(())
}

/// Scenario 4: a version-mismatched header is dropped with no response,
/// and a subsequent valid request on the same connection still succeeds.
#[tokio::test]
async fn version_mismatch_is_dropped_then_next_request_succeeds() -> Result<()> {
    let mgr = InMemorySessionManager::new(8);
    let mut bad = request(opcode::CREATE_CONTROL_SESSION, opcode::CONNECTION_DEFAULT, 0, 0);
    // protocol_version occupies bytes 8..12.
    bad[8] = bad[8].wrapping_add(1);
    let good = request(opcode::CREATE_CONTROL_SESSION, opcode::CONNECTION_DEFAULT, 0, 0);

    let mut link = VecLink::new(vec![bad, good]);

    let first = dispatcher::process_once(&mut link, &mgr, Duration::from_secs(1)).await?;
    assert!(matches!(first, DispatchOutcome::Dropped(FrameError::VersionMismatch(_))));
    assert!(link.sent().is_empty());

    let second = dispatcher::process_once(&mut link, &mgr, Duration::from_secs(1)).await?;
    assert!(matches!(second, DispatchOutcome::Responded(_)));
    assert_eq!(link.sent().len(), 1);
    Ok(())
}

/// Scenario 5: a 1,000-item capture stream larger than `PACKET_DATA_MAX_LEN`
/// fragments into multiple `SuccessFragmented` frames followed by one
/// `Success` frame, pushed by `drain_captured_data`.
#[tokio::test]
async fn large_capture_stream_fragments_and_drains() -> Result<()> {
    let mgr = InMemorySessionManager::new(8);
    let sgid = mgr.create_group().await;
    let jd = mgr.add_job(sgid).await?;
    mgr.register_table(sgid, jd, "bob", "orders").await?;
    mgr.start_capture(sgid, jd).await?;

    let captor = ChannelLogCaptor::new();
    let tx = captor.register_job(jd).await;
    let items: Vec<LogItem> = (0..1000)
        .map(|i| LogItem::Insert {
            table_name: "orders".to_owned(),
            set_columns: vec![Column { name: b"col".to_vec(), r#type: 0, value: vec![i as u8; 200] }],
        })
        .collect();
    tx.send(TransactionLogList { tid: captor.next_tid(), items, ref_cnt: 1 })?;

    let mut link = VecLink::new(Vec::new());
    dispatcher::drain_captured_data(&mut link, &mgr, &captor, sgid, jd, 64 * 1024).await?;

    let sent = link.sent();
    assert!(sent.len() > 1);
    let (last, init) = sent.split_last().unwrap();
    for frame in init {
        assert_eq!(response_header(frame).op_param, 1); // RC_SUCCESS_FRAGMENTED
    }
    assert_eq!(response_header(last).op_param, 0); // RC_SUCCESS
    for frame in &sent {
        assert_eq!(response_header(frame).op_id, opcode::CAPTURED_DATA_RESULT);
    }
    Ok(())
}

/// Scenario 6: starting capture twice on the same job succeeds once then
/// reports `RC_FAILED_JOB_ALREADY_STARTED`.
#[tokio::test]
async fn starting_capture_twice_reports_already_started() -> Result<()> {
    let mgr = InMemorySessionManager::new(8);
    let sgid = mgr.create_group().await;
    let jd = mgr.add_job(sgid).await?;
    mgr.register_table(sgid, jd, "bob", "orders").await?;

    let mut link = VecLink::new(vec![
        request(opcode::START_CAPTURE, 0, jd, sgid),
        request(opcode::START_CAPTURE, 0, jd, sgid),
    ]);

    let first = dispatcher::process_once(&mut link, &mgr, Duration::from_secs(1)).await?;
    assert!(matches!(
        first,
        DispatchOutcome::Responded(Some(t)) if t.running
    ));
    let second = dispatcher::process_once(&mut link, &mgr, Duration::from_secs(1)).await?;
    assert!(matches!(second, DispatchOutcome::Responded(None)));

    let sent = link.sent();
    assert_eq!(response_header(&sent[0]).op_param, 0); // RC_SUCCESS
    assert_eq!(response_header(&sent[1]).op_param, 14); // RC_FAILED_JOB_ALREADY_STARTED
    Ok(())
}
