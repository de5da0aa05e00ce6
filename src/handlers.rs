//! Operation handlers (§4.4): one `(do_X, send_X_result)` pair per
//! operation. `do_X` calls into [`crate::session::SessionManager`] and
//! returns a result code; `send_X_result` builds the response header and
//! serializes the response frame.

#![allow(clippy::little_endian_bytes, reason = "wire protocol is little-endian")]

use tracing::warn;

use crate::frame::{ProtocolHeader, encode_header};
use crate::opcode::{self, ResultCode};
use crate::session::{BackendError, JobStatus, SessionManager, StopCondition};
use crate::validator;

/// Translate a [`BackendError`] to its paired wire [`ResultCode`] (§4.4's
/// error-code translation table). `on_capture_start` selects between the
/// two different mappings `ALLOC` has depending on call site.
#[must_use]
pub const fn backend_error_to_wire(err: BackendError, on_capture_start: bool) -> ResultCode {
    match err {
        BackendError::InvalidHandle => ResultCode::FailedInvalidHandle,
        BackendError::CreateSessionFailed => ResultCode::FailedCreateSession,
        BackendError::SessionCloseFailed => ResultCode::FailedSessionClose,
        BackendError::JobNotExist => ResultCode::FailedInvalidJob,
        BackendError::ExceedMax => ResultCode::FailedNoMoreJobAllowed,
        BackendError::InvalidTableName => ResultCode::FailedInvalidTableName,
        BackendError::Alloc if on_capture_start => ResultCode::FailedInsufficientServerResource,
        BackendError::Alloc => ResultCode::Failed,
        BackendError::JobAlreadyStarted => ResultCode::FailedJobAlreadyStarted,
        BackendError::JobAlreadyStopped => ResultCode::FailedJobAlreadyStopped,
        BackendError::InvalidAttr => ResultCode::FailedJobAttrNotExist,
        BackendError::InvalidValue => ResultCode::FailedInvalidJobAttrValue,
        BackendError::InvalidJobStatus => ResultCode::FailedInvalidJobStatus,
    }
}

/// Build a response frame (header only; `data_len` carries a scalar
/// out-of-band result for the handful of operations that need one, `0`
/// otherwise) from already-decided wire values.
///
/// `op_id` is always one of this module's own `*_RESULT` constants, so the
/// `opid_in_range` check inside [`encode_header`] can never fail here.
fn build_response(op_id: u8, result_code: ResultCode, job_desc: u16, sgid: u32, data_len: u32) -> Vec<u8> {
    #[expect(clippy::expect_used, reason = "op_id is always one of this crate's own *_RESULT constants")]
    let header = encode_header(op_id, result_code.to_wire(), job_desc, sgid, data_len)
        .expect("handler response opcodes are always in range");
    header.to_bytes().to_vec()
}

/// As [`build_response`], but for the operations that echo a real
/// `job_desc` back on success: re-validates it there, mirroring the
/// original protocol's `ctcp_validate_job_desc` call at every such
/// `send_*_result` success path. A `job_desc` that fails this check (e.g.
/// because a deployment's configured job cap exceeds
/// `JOB_COUNT_PER_GROUP_MAX`) is downgraded to `RC_FAILED_INVALID_JOB`
/// rather than reported as success.
fn build_job_response(op_id: u8, result_code: ResultCode, job_desc: u16, sgid: u32, data_len: u32) -> Vec<u8> {
    let result_code = if result_code == ResultCode::Success {
        match validator::validate_job_desc(job_desc) {
            Ok(()) => result_code,
            Err(err) => {
                warn!(%err, "job_desc failed re-validation on a success path");
                ResultCode::FailedInvalidJob
            }
        }
    } else {
        result_code
    };
    build_response(op_id, result_code, job_desc, sgid, data_len)
}

/// `do_create_ctrl_session` / `send_create_ctrl_session_result`.
///
/// A nonzero incoming `sgid` is defined as invalid but not reported
/// (§4.4): the request is silently ignored (no group is allocated) and the
/// server still replies `RC_SUCCESS`, echoing the client's own `sgid`
/// unchanged.
pub async fn handle_create_ctrl_session(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    if header.session_group_id != opcode::NULL_SGID {
        return build_response(
            opcode::CREATE_CONTROL_SESSION_RESULT,
            ResultCode::Success,
            opcode::NULL_JOB_DESC,
            header.session_group_id,
            0,
        );
    }
    let new_sgid = session.create_group().await;
    build_response(
        opcode::CREATE_CONTROL_SESSION_RESULT,
        ResultCode::Success,
        opcode::NULL_JOB_DESC,
        new_sgid,
        0,
    )
}

/// `do_destroy_ctrl_session` / `send_destroy_ctrl_session_result`.
///
/// Preserves the branch-set result code rather than unconditionally
/// overwriting it with `RC_SUCCESS` (§9's result-code-leakage bug fix).
pub async fn handle_destroy_ctrl_session(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    let result_code = match session.destroy_group(header.session_group_id).await {
        Ok(()) => ResultCode::Success,
        Err(err) => backend_error_to_wire(err, false),
    };
    build_response(
        opcode::DESTROY_CONTROL_SESSION_RESULT,
        result_code,
        opcode::NULL_JOB_DESC,
        header.session_group_id,
        0,
    )
}

/// `do_create_job_session` / `send_create_job_session_result`.
pub async fn handle_create_job_session(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    let (result_code, jd) = match session.add_job(header.session_group_id).await {
        Ok(jd) => (ResultCode::Success, jd),
        Err(err) => (backend_error_to_wire(err, false), opcode::NULL_JOB_DESC),
    };
    build_job_response(opcode::CREATE_JOB_SESSION_RESULT, result_code, jd, header.session_group_id, 0)
}

/// `do_destroy_job_session` / `send_destroy_job_session_result`.
pub async fn handle_destroy_job_session(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    let result_code = match session.delete_job(header.session_group_id, header.job_desc).await {
        Ok(()) => ResultCode::Success,
        Err(err) => backend_error_to_wire(err, false),
    };
    build_response(
        opcode::DESTROY_JOB_SESSION_RESULT,
        result_code,
        header.job_desc,
        header.session_group_id,
        0,
    )
}

/// `do_request_job_status` / `send_request_job_status_result`. The status
/// enum value is carried back in `data_len` (an out-of-band channel reused
/// here for a scalar, mirroring `SET_JOB_ATTRIBUTE`'s use of `data_len` for
/// its value).
pub async fn handle_request_job_status(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    match session.job_status(header.session_group_id, header.job_desc).await {
        Ok(status) => {
            let status_code = match status {
                JobStatus::Created => 0u32,
                JobStatus::Prepared => 1,
                JobStatus::Running => 2,
                JobStatus::Stopped => 3,
                JobStatus::Closed => 4,
            };
            build_job_response(
                opcode::REQUEST_JOB_STATUS_RESULT,
                ResultCode::Success,
                header.job_desc,
                header.session_group_id,
                status_code,
            )
        }
        Err(err) => build_response(
            opcode::REQUEST_JOB_STATUS_RESULT,
            backend_error_to_wire(err, false),
            header.job_desc,
            header.session_group_id,
            0,
        ),
    }
}

/// `do_request_server_status` / `send_request_server_status_result`. The
/// server-wide job count is carried back in `data_len`.
pub async fn handle_request_server_status(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    let status = session.server_status().await;
    build_response(
        opcode::REQUEST_SERVER_STATUS_RESULT,
        ResultCode::Success,
        opcode::NULL_JOB_DESC,
        header.session_group_id,
        status.job_count,
    )
}

/// Parse the two length-prefixed strings `REGISTER_TABLE`/`UNREGISTER_TABLE`
/// carry: `u32 user_len · user · u32 table_len · table`.
fn parse_user_table(payload: &[u8]) -> Option<(String, String)> {
    if payload.len() < 4 {
        return None;
    }
    let user_len = u32::from_le_bytes(payload.get(0..4)?.try_into().ok()?) as usize;
    let user_start = 4;
    let user_end = user_start.checked_add(user_len)?;
    let user = String::from_utf8(payload.get(user_start..user_end)?.to_vec()).ok()?;

    let table_len_start = user_end;
    let table_len_end = table_len_start.checked_add(4)?;
    let table_len = u32::from_le_bytes(payload.get(table_len_start..table_len_end)?.try_into().ok()?) as usize;
    let table_start = table_len_end;
    let table_end = table_start.checked_add(table_len)?;
    let table = String::from_utf8(payload.get(table_start..table_end)?.to_vec()).ok()?;

    Some((user, table))
}

/// `do_register_table` / `send_register_table_result`.
///
/// Per §4.4: look up whether the table is already registered first, and
/// fail with `RC_FAILED_TABLE_ALREADY_EXIST` rather than delegating that
/// check to the backend mutator.
pub async fn handle_register_table(
    session: &dyn SessionManager,
    header: &ProtocolHeader,
    payload: &[u8],
) -> Vec<u8> {
    let Some((user, table)) = parse_user_table(payload) else {
        return build_response(
            opcode::REGISTER_TABLE_RESULT,
            ResultCode::FailedWrongPacket,
            header.job_desc,
            header.session_group_id,
            0,
        );
    };
    let result_code = match session
        .is_table_registered(header.session_group_id, header.job_desc, &user, &table)
        .await
    {
        Ok(true) => ResultCode::FailedTableAlreadyExist,
        Ok(false) => match session
            .register_table(header.session_group_id, header.job_desc, &user, &table)
            .await
        {
            Ok(()) => ResultCode::Success,
            Err(err) => backend_error_to_wire(err, false),
        },
        Err(err) => backend_error_to_wire(err, false),
    };
    build_job_response(opcode::REGISTER_TABLE_RESULT, result_code, header.job_desc, header.session_group_id, 0)
}

/// `do_unregister_table` / `send_unregister_table_result`.
pub async fn handle_unregister_table(
    session: &dyn SessionManager,
    header: &ProtocolHeader,
    payload: &[u8],
) -> Vec<u8> {
    let Some((user, table)) = parse_user_table(payload) else {
        return build_response(
            opcode::UNREGISTER_TABLE_RESULT,
            ResultCode::FailedWrongPacket,
            header.job_desc,
            header.session_group_id,
            0,
        );
    };
    let result_code = match session
        .is_table_registered(header.session_group_id, header.job_desc, &user, &table)
        .await
    {
        Ok(false) => ResultCode::FailedUnregisteredTable,
        Ok(true) => match session
            .unregister_table(header.session_group_id, header.job_desc, &user, &table)
            .await
        {
            Ok(()) => ResultCode::Success,
            Err(err) => backend_error_to_wire(err, false),
        },
        Err(err) => backend_error_to_wire(err, false),
    };
    build_job_response(opcode::UNREGISTER_TABLE_RESULT, result_code, header.job_desc, header.session_group_id, 0)
}

/// `do_set_job_attribute` / `send_set_job_attribute_result`. Attribute id
/// travels in `op_param`, the value in `data_len` (§6.1).
pub async fn handle_set_job_attribute(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    let result_code = match session
        .set_job_attr(header.session_group_id, header.job_desc, header.op_param, header.data_len)
        .await
    {
        Ok(()) => ResultCode::Success,
        Err(err) => backend_error_to_wire(err, false),
    };
    build_job_response(
        opcode::SET_JOB_ATTRIBUTE_RESULT,
        result_code,
        header.job_desc,
        header.session_group_id,
        0,
    )
}

/// `do_start_capture` / `send_start_capture_result`.
pub async fn handle_start_capture(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    let result_code = match session.start_capture(header.session_group_id, header.job_desc).await {
        Ok(()) => ResultCode::Success,
        Err(err) => backend_error_to_wire(err, true),
    };
    build_job_response(
        opcode::START_CAPTURE_RESULT,
        result_code,
        header.job_desc,
        header.session_group_id,
        0,
    )
}

/// `do_stop_capture` / `send_stop_capture_result`. Close condition travels
/// in `op_param`.
pub async fn handle_stop_capture(session: &dyn SessionManager, header: &ProtocolHeader) -> Vec<u8> {
    let cond = if header.op_param == opcode::STOP_AFTER_TRANS {
        StopCondition::AfterTransaction
    } else {
        StopCondition::Immediately
    };
    let result_code = match session.stop_capture(header.session_group_id, header.job_desc, cond).await {
        Ok(()) => ResultCode::Success,
        Err(err) => backend_error_to_wire(err, false),
    };
    build_job_response(
        opcode::STOP_CAPTURE_RESULT,
        result_code,
        header.job_desc,
        header.session_group_id,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{HEADER_LEN, NEGOTIATED_VERSION};
    use crate::session::InMemorySessionManager;

    fn req_header(op_id: u8, op_param: u8, job_desc: u16, sgid: u32) -> ProtocolHeader {
        ProtocolHeader {
            op_id,
            op_param,
            job_desc,
            session_group_id: sgid,
            protocol_version: NEGOTIATED_VERSION,
            data_len: 0,
        }
    }

    /// Response frames pair a result opcode with `op_param`, which
    /// `decode_header` would reject as "a result opcode used as a
    /// request" — parse the raw header fields directly instead.
    fn parse_response(frame: &[u8]) -> ProtocolHeader {
        let mut buf = [0u8; HEADER_LEN];
        buf.copy_from_slice(&frame[..HEADER_LEN]);
        ProtocolHeader::from_bytes(&buf)
    }

    #[tokio::test]
    async fn create_ctrl_session_allocates_a_fresh_sgid() -> anyhow::Result<()> {
        let mgr = InMemorySessionManager::new(8);
        let frame = handle_create_ctrl_session(&mgr, &req_header(opcode::CREATE_CONTROL_SESSION, 0, 0, 0)).await;
        let header = parse_response(&frame);
        assert_eq!(header.op_id, opcode::CREATE_CONTROL_SESSION_RESULT);
        assert_eq!(header.op_param, ResultCode::Success.to_wire());
        assert!(header.session_group_id > 0);
        Ok(())
    }

    #[tokio::test]
    async fn create_ctrl_session_ignores_a_preassigned_sgid_but_still_succeeds() -> anyhow::Result<()> {
        let mgr = InMemorySessionManager::new(8);
        let frame = handle_create_ctrl_session(&mgr, &req_header(opcode::CREATE_CONTROL_SESSION, 0, 0, 42)).await;
        let header = parse_response(&frame);
        assert_eq!(header.op_param, ResultCode::Success.to_wire());
        assert_eq!(header.session_group_id, 42);
        Ok(())
    }

    #[tokio::test]
    async fn destroy_ctrl_session_reports_invalid_handle_without_overwriting_it() -> anyhow::Result<()> {
        let mgr = InMemorySessionManager::new(8);
        let frame = handle_destroy_ctrl_session(&mgr, &req_header(opcode::DESTROY_CONTROL_SESSION, 0, 0, 999)).await;
        let header = parse_response(&frame);
        assert_eq!(header.op_param, ResultCode::FailedInvalidHandle.to_wire());
        Ok(())
    }

    #[tokio::test]
    async fn register_then_reregister_table_fails_already_exist() -> anyhow::Result<()> {
        let mgr = InMemorySessionManager::new(8);
        let sgid = mgr.create_group().await;
        let jd = mgr.add_job(sgid).await?;
        let mut payload = Vec::new();
        payload.extend_from_slice(&3u32.to_le_bytes());
        payload.extend_from_slice(b"bob");
        payload.extend_from_slice(&6u32.to_le_bytes());
        payload.extend_from_slice(b"orders");

        let header = req_header(opcode::REGISTER_TABLE, 0, jd, sgid);
        let first = handle_register_table(&mgr, &header, &payload).await;
        assert_eq!(parse_response(&first).op_param, ResultCode::Success.to_wire());

        let second = handle_register_table(&mgr, &header, &payload).await;
        assert_eq!(parse_response(&second).op_param, ResultCode::FailedTableAlreadyExist.to_wire());
        Ok(())
    }

    #[tokio::test]
    async fn start_capture_then_stop_round_trips_status() -> anyhow::Result<()> {
        let mgr = InMemorySessionManager::new(8);
        let sgid = mgr.create_group().await;
        let jd = mgr.add_job(sgid).await?;
        mgr.register_table(sgid, jd, "bob", "orders").await?;

        let start = handle_start_capture(&mgr, &req_header(opcode::START_CAPTURE, 0, jd, sgid)).await;
        assert_eq!(parse_response(&start).op_param, ResultCode::Success.to_wire());

        let stop =
            handle_stop_capture(&mgr, &req_header(opcode::STOP_CAPTURE, opcode::STOP_IMMEDIATELY, jd, sgid)).await;
        assert_eq!(parse_response(&stop).op_param, ResultCode::Success.to_wire());
        Ok(())
    }
}
