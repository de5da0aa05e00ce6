//! Stateless predicates over opcode, opcode parameter, job descriptor and
//! protocol version. Nothing here touches `SessionManager` state; every
//! function is a pure check over its arguments.

use crate::error::ValidationError;
use crate::frame::NEGOTIATED_VERSION;
use crate::opcode::{
    self, CTRL_MAX, CTRL_MIN, DATA_MAX, DATA_MIN, JOB_ATTR_ID_LAST, JOB_ATTR_ID_START,
    JOB_COUNT_PER_GROUP_MAX, RESULT_FACTOR,
};

/// Whether `op_id` falls within either the control or capture-data opcode
/// range. The two ranges are disjoint.
#[must_use]
pub const fn opid_in_range(op_id: u8) -> bool {
    (CTRL_MIN < op_id && op_id < CTRL_MAX) || (DATA_MIN < op_id && op_id < DATA_MAX)
}

/// Whether `op_id` is a valid *request* (server-bound) opcode.
///
/// Request opcodes are the non-result opcodes — `op_id % RESULT_FACTOR !=
/// 0` — plus the explicit exception [`opcode::START_CAPTURE`], which is
/// numerically a multiple of `RESULT_FACTOR` but is nonetheless a request.
/// [`opcode::START_CAPTURE_RESULT`] and [`opcode::CAPTURED_DATA_RESULT`]
/// are explicitly excluded: both are genuinely result-side opcodes that
/// happen not to be multiples of `RESULT_FACTOR`, so the modulo check
/// alone would admit them as requests.
#[must_use]
pub const fn is_recv_opcode(op_id: u8) -> bool {
    if op_id == opcode::START_CAPTURE {
        return true;
    }
    if op_id == opcode::START_CAPTURE_RESULT || op_id == opcode::CAPTURED_DATA_RESULT {
        return false;
    }
    op_id % RESULT_FACTOR != 0
}

/// Validate `op_param` against the domain `op_id` defines.
///
/// All opcodes not named explicitly accept only `op_param == 0`.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidOpParam`] if `op_param` is outside the
/// domain `op_id` defines.
#[must_use]
pub const fn validate_op_param(op_id: u8, op_param: u8) -> Result<(), ValidationError> {
    let ok = match op_id {
        opcode::CREATE_CONTROL_SESSION => {
            matches!(op_param, opcode::CONNECTION_DEFAULT | opcode::CONNECTION_CTRL_ONLY)
        }
        opcode::SET_JOB_ATTRIBUTE => op_param > JOB_ATTR_ID_START && op_param < JOB_ATTR_ID_LAST,
        opcode::STOP_CAPTURE => matches!(op_param, opcode::STOP_IMMEDIATELY | opcode::STOP_AFTER_TRANS),
        _ => op_param == 0,
    };
    if ok { Ok(()) } else { Err(ValidationError::InvalidOpParam { op_id, param: op_param }) }
}

/// Validate a job descriptor: `0 < jd <= JOB_COUNT_PER_GROUP_MAX`.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidJobDesc`] if `jd` is zero or exceeds
/// `JOB_COUNT_PER_GROUP_MAX`.
#[must_use]
pub const fn validate_job_desc(jd: u16) -> Result<(), ValidationError> {
    if jd > 0 && jd <= JOB_COUNT_PER_GROUP_MAX {
        Ok(())
    } else {
        Err(ValidationError::InvalidJobDesc(jd))
    }
}

/// Validate a decoded `protocol_version` field against the negotiated
/// constant. A mismatch is not reported to the caller in any wire
/// response — the dispatcher drops the frame outright.
#[must_use]
pub const fn validate_version(version: u32) -> bool { version == NEGOTIATED_VERSION }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::opcode::{
        CONNECTION_CTRL_ONLY, CONNECTION_DEFAULT, CREATE_CONTROL_SESSION, CREATE_JOB_SESSION,
        REGISTER_TABLE, SET_JOB_ATTRIBUTE, START_CAPTURE, STOP_AFTER_TRANS, STOP_CAPTURE,
        STOP_IMMEDIATELY,
    };

    #[rstest]
    #[case(0, false)]
    #[case(20, false)]
    #[case(21, true)]
    #[case(199, true)]
    #[case(200, false)]
    #[case(1, true)]
    #[case(19, true)]
    fn opid_in_range_matches_expected(#[case] op_id: u8, #[case] expected: bool) {
        assert_eq!(opid_in_range(op_id), expected);
    }

    #[test]
    fn start_capture_is_recv_despite_being_a_multiple_of_result_factor() {
        assert_eq!(START_CAPTURE % RESULT_FACTOR, 0);
        assert!(is_recv_opcode(START_CAPTURE));
    }

    #[test]
    fn result_opcodes_are_rejected_as_requests() {
        assert!(!is_recv_opcode(super::opcode::CREATE_CONTROL_SESSION_RESULT));
    }

    #[test]
    fn start_capture_result_and_captured_data_result_are_rejected_as_requests() {
        assert!(!is_recv_opcode(super::opcode::START_CAPTURE_RESULT));
        assert!(!is_recv_opcode(super::opcode::CAPTURED_DATA_RESULT));
    }

    #[rstest]
    #[case(CREATE_CONTROL_SESSION, CONNECTION_DEFAULT, true)]
    #[case(CREATE_CONTROL_SESSION, CONNECTION_CTRL_ONLY, true)]
    #[case(CREATE_CONTROL_SESSION, 2, false)]
    #[case(SET_JOB_ATTRIBUTE, 1, true)]
    #[case(SET_JOB_ATTRIBUTE, 0, false)]
    #[case(SET_JOB_ATTRIBUTE, 10, false)]
    #[case(STOP_CAPTURE, STOP_IMMEDIATELY, true)]
    #[case(STOP_CAPTURE, STOP_AFTER_TRANS, true)]
    #[case(STOP_CAPTURE, 0xFF, false)]
    #[case(CREATE_JOB_SESSION, 0, true)]
    #[case(CREATE_JOB_SESSION, 1, false)]
    #[case(REGISTER_TABLE, 0, true)]
    fn validate_op_param_matches_expected(
        #[case] op_id: u8,
        #[case] op_param: u8,
        #[case] expected: bool,
    ) {
        assert_eq!(validate_op_param(op_id, op_param).is_ok(), expected);
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(JOB_COUNT_PER_GROUP_MAX, true)]
    #[case(JOB_COUNT_PER_GROUP_MAX + 1, false)]
    fn validate_job_desc_matches_expected(#[case] jd: u16, #[case] expected: bool) {
        assert_eq!(validate_job_desc(jd).is_ok(), expected);
    }

    #[test]
    fn version_mismatch_rejected() {
        assert!(validate_version(crate::frame::NEGOTIATED_VERSION));
        assert!(!validate_version(crate::frame::NEGOTIATED_VERSION + 1));
    }
}
