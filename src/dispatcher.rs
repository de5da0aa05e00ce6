//! Request/response pipeline (§4.3): decode a header, validate it,
//! route to the paired handler, and write exactly one response frame
//! (every operation except `CREATE_CONTROL_SESSION`-without-handshake
//! always responds, even on failure).
//!
//! Capture-data push is a separate concern, driven by [`drain_captured_data`]
//! from the server's per-connection loop rather than from [`process_once`]:
//! `CAPTURED_DATA_RESULT` frames are not responses to a client request, they
//! are pushed whenever the [`crate::logcapture::LogCaptor`] has buffered
//! transactions for a running job.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CtcpError, FrameError};
use crate::frame::{HEADER_LEN, decode_header, encode_header};
use crate::handlers;
use crate::link::LinkIO;
use crate::logcapture::LogCaptor;
use crate::opcode::{self, ResultCode};
use crate::session::SessionManager;
use crate::streamer;

/// A `START_CAPTURE`/`STOP_CAPTURE` request that succeeded, so the
/// server's per-connection loop knows which `(sgid, jd)` pairs to poll
/// [`crate::logcapture::LogCaptor`] for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTransition {
    /// Session group the job belongs to.
    pub sgid: u32,
    /// Job descriptor whose capture state changed.
    pub jd: u16,
    /// `true` if capture just started, `false` if it just stopped.
    pub running: bool,
}

/// What happened to one read-decode-route-respond cycle.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The frame failed a tier-1 check ([`FrameError`]) and was dropped
    /// without a response.
    Dropped(FrameError),
    /// A response frame was routed, handled, and written back. Carries a
    /// [`CaptureTransition`] when the routed operation was a successful
    /// `START_CAPTURE` or `STOP_CAPTURE`.
    Responded(Option<CaptureTransition>),
}

/// Read one frame, validate and route it, and write back a response.
///
/// # Errors
///
/// Returns [`CtcpError`] for connection-fatal conditions (I/O failure,
/// recv timeout, or a write that could not fit in the link's buffer).
/// Tier-1 frame errors are not returned as `Err`; they surface as
/// [`DispatchOutcome::Dropped`] so the caller keeps reading.
pub async fn process_once(
    link: &mut dyn LinkIO,
    session: &dyn SessionManager,
    recv_timeout: Duration,
) -> Result<DispatchOutcome, CtcpError> {
    let raw = link.recv(recv_timeout).await?;
    if raw.len() < HEADER_LEN {
        return Ok(DispatchOutcome::Dropped(FrameError::ShortHeader(raw.len())));
    }

    let header = match decode_header(&raw, None) {
        Ok(header) => header,
        Err(err) => {
            debug!(error = %err, "dropping frame that failed header validation");
            return Ok(DispatchOutcome::Dropped(err));
        }
    };

    let payload = raw.get(HEADER_LEN..).unwrap_or_default();

    if let Err(err) = crate::validator::validate_op_param(header.op_id, header.op_param) {
        warn!(%err, "rejecting invalid op_param");
        let Some(result_opcode) = opcode::result_opcode_for(header.op_id) else {
            debug!(op_id = header.op_id, "dropping unroutable frame with invalid op_param");
            return Ok(DispatchOutcome::Dropped(FrameError::OpIdOutOfRange(header.op_id)));
        };
        let frame = reject(result_opcode, header.job_desc, header.session_group_id);
        link.send(&frame).await?;
        return Ok(DispatchOutcome::Responded(None));
    }

    let response = match header.op_id {
        opcode::CREATE_CONTROL_SESSION => handlers::handle_create_ctrl_session(session, &header).await,
        opcode::DESTROY_CONTROL_SESSION => handlers::handle_destroy_ctrl_session(session, &header).await,
        opcode::CREATE_JOB_SESSION => handlers::handle_create_job_session(session, &header).await,
        opcode::DESTROY_JOB_SESSION => handlers::handle_destroy_job_session(session, &header).await,
        opcode::REQUEST_JOB_STATUS => handlers::handle_request_job_status(session, &header).await,
        opcode::REQUEST_SERVER_STATUS => handlers::handle_request_server_status(session, &header).await,
        opcode::REGISTER_TABLE => handlers::handle_register_table(session, &header, payload).await,
        opcode::UNREGISTER_TABLE => handlers::handle_unregister_table(session, &header, payload).await,
        opcode::SET_JOB_ATTRIBUTE => handlers::handle_set_job_attribute(session, &header).await,
        opcode::START_CAPTURE => handlers::handle_start_capture(session, &header).await,
        opcode::STOP_CAPTURE => handlers::handle_stop_capture(session, &header).await,
        unknown => {
            debug!(op_id = unknown, "dropping frame with an in-range but unassigned opcode");
            return Ok(DispatchOutcome::Dropped(FrameError::OpIdOutOfRange(unknown)));
        }
    };

    let succeeded = response.get(1).copied() == Some(ResultCode::Success.to_wire());
    let transition = match header.op_id {
        opcode::START_CAPTURE if succeeded => {
            Some(CaptureTransition { sgid: header.session_group_id, jd: header.job_desc, running: true })
        }
        opcode::STOP_CAPTURE if succeeded => {
            Some(CaptureTransition { sgid: header.session_group_id, jd: header.job_desc, running: false })
        }
        _ => None,
    };

    link.send(&response).await?;
    Ok(DispatchOutcome::Responded(transition))
}

/// Build a reject response for an invalid `op_param`, given the request's
/// paired result opcode (from [`opcode::result_opcode_for`]).
///
/// Uses the generic [`ResultCode::Failed`], not `FailedWrongPacket`: the
/// header itself decoded fine, only the operation-specific parameter was
/// out of its domain.
fn reject(result_opcode: u8, job_desc: u16, sgid: u32) -> Vec<u8> {
    #[expect(clippy::expect_used, reason = "result_opcode_for only returns opcodes already known to be in range")]
    let header = encode_header(result_opcode, ResultCode::Failed.to_wire(), job_desc, sgid, 0)
        .expect("result_opcode_for only returns in-range opcodes");
    header.to_bytes().to_vec()
}

/// Drain a running job's captor queue and push any `CAPTURED_DATA_RESULT`
/// frames it yields.
///
/// Per §4.5's tie-break rule, an oversized single item is reported via
/// [`CtcpError::OversizedItem`] but is *not* connection-fatal: the job is
/// force-stopped and the connection is kept open so the client can still
/// issue further control-plane requests.
///
/// # Errors
///
/// Returns [`CtcpError`] only for a link I/O failure while pushing a
/// frame; an oversized item is handled internally and never escapes.
pub async fn drain_captured_data(
    link: &mut dyn LinkIO,
    session: &dyn SessionManager,
    captor: &dyn LogCaptor,
    sgid: u32,
    jd: u16,
    packet_data_max_len: usize,
) -> Result<(), CtcpError> {
    let mut batch = captor.poll(jd).await;
    if batch.is_empty() {
        return Ok(());
    }

    match streamer::encode_captured_data(&mut batch, packet_data_max_len) {
        Ok(frames) => {
            for frame in frames {
                #[expect(clippy::expect_used, reason = "CAPTURED_DATA_RESULT is a crate constant always in range")]
                let header = encode_header(
                    opcode::CAPTURED_DATA_RESULT,
                    frame.result_code.to_wire(),
                    jd,
                    sgid,
                    u32::try_from(frame.payload.len()).unwrap_or(u32::MAX),
                )
                .expect("CAPTURED_DATA_RESULT is always in range");
                let mut out = header.to_bytes().to_vec();
                out.extend_from_slice(&frame.payload);
                link.send(&out).await?;
            }
            Ok(())
        }
        Err(CtcpError::OversizedItem { table_name }) => {
            warn!(%table_name, sgid, jd, "oversized capture item, stopping job");
            session.force_stop(sgid, jd).await;
            Ok(())
        }
        Err(other) => Err(other),
    }
}
