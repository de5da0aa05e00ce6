//! Wire opcode and result-code tables.
//!
//! Numeric values are compile-time constants (see the "Global/process-wide
//! state" design note): the protocol core never renumbers opcodes at
//! runtime. `RESULT_FACTOR` ties every request opcode to its paired result
//! opcode except [`START_CAPTURE_RESULT`], which is explicitly whitelisted.

/// Multiplier relating a request opcode to its paired result opcode.
pub const RESULT_FACTOR: u8 = 5;

/// Exclusive lower bound of the capture-data opcode range.
pub const DATA_MIN: u8 = 0;
/// Exclusive upper bound of the capture-data opcode range.
pub const DATA_MAX: u8 = 20;
/// Exclusive lower bound of the control opcode range.
pub const CTRL_MIN: u8 = 20;
/// Exclusive upper bound of the control opcode range.
pub const CTRL_MAX: u8 = 200;

// --- Capture-data range (1..=19) ---------------------------------------

/// Begin streaming captured rows for a job.
///
/// Numerically a multiple of [`RESULT_FACTOR`], which would ordinarily mark
/// it as a result-side opcode; it is carved out as the one explicit
/// exception to that rule (see [`is_recv_opcode`](crate::validator::is_recv_opcode)).
pub const START_CAPTURE: u8 = 10;
/// Stop streaming captured rows for a job.
pub const STOP_CAPTURE: u8 = 11;
/// Response to [`START_CAPTURE`]. Whitelisted: *not* `START_CAPTURE * RESULT_FACTOR`.
pub const START_CAPTURE_RESULT: u8 = 16;
/// Response to [`STOP_CAPTURE`]. Whitelisted for the same reason as
/// [`START_CAPTURE_RESULT`]: `STOP_CAPTURE * RESULT_FACTOR` (55) falls
/// outside the capture-data range, so this is a distinct reserved value
/// rather than a computed one.
pub const STOP_CAPTURE_RESULT: u8 = 15;
/// Server-to-client only: a fragment of captured row data.
pub const CAPTURED_DATA_RESULT: u8 = 17;

// --- Control range (21..=199) -------------------------------------------

/// Open a control session (session group).
pub const CREATE_CONTROL_SESSION: u8 = 21;
/// Close a control session and all jobs beneath it.
pub const DESTROY_CONTROL_SESSION: u8 = 22;
/// Create a new job within a session group.
pub const CREATE_JOB_SESSION: u8 = 23;
/// Destroy a job within a session group.
pub const DESTROY_JOB_SESSION: u8 = 24;
/// Query a job's current status.
pub const REQUEST_JOB_STATUS: u8 = 26;
/// Query overall server status.
pub const REQUEST_SERVER_STATUS: u8 = 27;
/// Register a table for capture under a job.
pub const REGISTER_TABLE: u8 = 28;
/// Unregister a table from a job.
pub const UNREGISTER_TABLE: u8 = 29;
/// Set a job attribute (attribute id travels in `op_param`).
pub const SET_JOB_ATTRIBUTE: u8 = 31;

/// Response to [`CREATE_CONTROL_SESSION`].
pub const CREATE_CONTROL_SESSION_RESULT: u8 = CREATE_CONTROL_SESSION * RESULT_FACTOR;
/// Response to [`DESTROY_CONTROL_SESSION`].
pub const DESTROY_CONTROL_SESSION_RESULT: u8 = DESTROY_CONTROL_SESSION * RESULT_FACTOR;
/// Response to [`CREATE_JOB_SESSION`].
pub const CREATE_JOB_SESSION_RESULT: u8 = CREATE_JOB_SESSION * RESULT_FACTOR;
/// Response to [`DESTROY_JOB_SESSION`].
pub const DESTROY_JOB_SESSION_RESULT: u8 = DESTROY_JOB_SESSION * RESULT_FACTOR;
/// Response to [`REQUEST_JOB_STATUS`].
pub const REQUEST_JOB_STATUS_RESULT: u8 = REQUEST_JOB_STATUS * RESULT_FACTOR;
/// Response to [`REQUEST_SERVER_STATUS`].
pub const REQUEST_SERVER_STATUS_RESULT: u8 = REQUEST_SERVER_STATUS * RESULT_FACTOR;
/// Response to [`REGISTER_TABLE`].
pub const REGISTER_TABLE_RESULT: u8 = REGISTER_TABLE * RESULT_FACTOR;
/// Response to [`UNREGISTER_TABLE`].
pub const UNREGISTER_TABLE_RESULT: u8 = UNREGISTER_TABLE * RESULT_FACTOR;
/// Response to [`SET_JOB_ATTRIBUTE`].
pub const SET_JOB_ATTRIBUTE_RESULT: u8 = SET_JOB_ATTRIBUTE * RESULT_FACTOR;

/// Look up the result opcode paired with a request opcode.
///
/// Used by the dispatcher when it must reply before routing to a
/// specific handler (an invalid `op_param`, for instance): `op_id *
/// RESULT_FACTOR` is not a safe general formula, since e.g. `STOP_CAPTURE
/// * RESULT_FACTOR` lands on a number that happens to fall inside the
/// control range without being anyone's real result opcode.
#[must_use]
pub const fn result_opcode_for(op_id: u8) -> Option<u8> {
    match op_id {
        START_CAPTURE => Some(START_CAPTURE_RESULT),
        STOP_CAPTURE => Some(STOP_CAPTURE_RESULT),
        CREATE_CONTROL_SESSION => Some(CREATE_CONTROL_SESSION_RESULT),
        DESTROY_CONTROL_SESSION => Some(DESTROY_CONTROL_SESSION_RESULT),
        CREATE_JOB_SESSION => Some(CREATE_JOB_SESSION_RESULT),
        DESTROY_JOB_SESSION => Some(DESTROY_JOB_SESSION_RESULT),
        REQUEST_JOB_STATUS => Some(REQUEST_JOB_STATUS_RESULT),
        REQUEST_SERVER_STATUS => Some(REQUEST_SERVER_STATUS_RESULT),
        REGISTER_TABLE => Some(REGISTER_TABLE_RESULT),
        UNREGISTER_TABLE => Some(UNREGISTER_TABLE_RESULT),
        SET_JOB_ATTRIBUTE => Some(SET_JOB_ATTRIBUTE_RESULT),
        _ => None,
    }
}

// --- `op_param` domains ---------------------------------------------------

/// `CREATE_CONTROL_SESSION` parameter: full control + data connection.
pub const CONNECTION_DEFAULT: u8 = 0;
/// `CREATE_CONTROL_SESSION` parameter: control-only connection.
pub const CONNECTION_CTRL_ONLY: u8 = 1;

/// Exclusive lower bound of valid `SET_JOB_ATTRIBUTE` attribute ids.
pub const JOB_ATTR_ID_START: u8 = 0;
/// Exclusive upper bound of valid `SET_JOB_ATTRIBUTE` attribute ids.
pub const JOB_ATTR_ID_LAST: u8 = 10;

/// `STOP_CAPTURE` parameter: truncate immediately.
pub const STOP_IMMEDIATELY: u8 = 0;
/// `STOP_CAPTURE` parameter: drain the in-flight transaction first.
pub const STOP_AFTER_TRANS: u8 = 1;

/// Sentinel `job_desc` meaning "no job" / NULL job.
pub const NULL_JOB_DESC: u16 = 0;
/// Sentinel `session_group_id` meaning "not yet assigned".
pub const NULL_SGID: u32 = 0;
/// Highest job descriptor a session group may allocate.
pub const JOB_COUNT_PER_GROUP_MAX: u16 = 64;

/// Wire result codes, carried in a response frame's `op_param` byte.
///
/// `RC_SUCCESS` is `0` so a freshly zeroed header defaults to success,
/// matching the convention the rest of the wire format uses for "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// Operation completed; this is the only (or final) response frame.
    Success = 0,
    /// Operation completed; more `CAPTURED_DATA_RESULT` frames follow for
    /// the same transaction.
    SuccessFragmented = 1,
    /// Generic failure with no more specific code.
    Failed = 2,
    /// The session group handle was not found.
    FailedInvalidHandle = 3,
    /// The backend could not create a session group.
    FailedCreateSession = 4,
    /// The backend failed to close a session group cleanly.
    FailedSessionClose = 5,
    /// The session group has no more job slots available.
    FailedNoMoreJobAllowed = 6,
    /// The referenced job descriptor does not exist.
    FailedInvalidJob = 7,
    /// The job exists but is in the wrong state for this operation.
    FailedInvalidJobStatus = 8,
    /// The supplied table name failed validation.
    FailedInvalidTableName = 9,
    /// The table is already registered under this job.
    FailedTableAlreadyExist = 10,
    /// The table was not registered under this job.
    FailedUnregisteredTable = 11,
    /// The requested job attribute id does not exist.
    FailedJobAttrNotExist = 12,
    /// The supplied job attribute value is invalid.
    FailedInvalidJobAttrValue = 13,
    /// The job is already capturing.
    FailedJobAlreadyStarted = 14,
    /// The job is already stopped.
    FailedJobAlreadyStopped = 15,
    /// The server could not allocate the resources capture requires.
    FailedInsufficientServerResource = 16,
    /// The frame could not be parsed or was otherwise malformed.
    FailedWrongPacket = 17,
}

impl ResultCode {
    /// Reinterpret a raw wire byte as a [`ResultCode`].
    ///
    /// Unknown values are coerced to [`ResultCode::Failed`] so that a
    /// `send_*_result` handler always transmits a code the client
    /// recognises (see the error-handling design's coercion rule).
    #[must_use]
    pub const fn from_wire(raw: u8) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::SuccessFragmented,
            3 => Self::FailedInvalidHandle,
            4 => Self::FailedCreateSession,
            5 => Self::FailedSessionClose,
            6 => Self::FailedNoMoreJobAllowed,
            7 => Self::FailedInvalidJob,
            8 => Self::FailedInvalidJobStatus,
            9 => Self::FailedInvalidTableName,
            10 => Self::FailedTableAlreadyExist,
            11 => Self::FailedUnregisteredTable,
            12 => Self::FailedJobAttrNotExist,
            13 => Self::FailedInvalidJobAttrValue,
            14 => Self::FailedJobAlreadyStarted,
            15 => Self::FailedJobAlreadyStopped,
            16 => Self::FailedInsufficientServerResource,
            17 => Self::FailedWrongPacket,
            _ => Self::Failed,
        }
    }

    /// The raw wire byte for this code.
    #[must_use]
    pub const fn to_wire(self) -> u8 { self as u8 }

    /// Whether this code represents a (possibly fragmented) success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SuccessFragmented)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{DATA_MAX, CTRL_MAX, CTRL_MIN, ResultCode};

    #[rstest]
    #[case(0, ResultCode::Success)]
    #[case(1, ResultCode::SuccessFragmented)]
    #[case(17, ResultCode::FailedWrongPacket)]
    #[case(200, ResultCode::Failed)]
    fn from_wire_maps_known_and_unknown_codes(#[case] raw: u8, #[case] expected: ResultCode) {
        assert_eq!(ResultCode::from_wire(raw), expected);
    }

    #[test]
    fn ranges_are_disjoint() {
        assert!(CTRL_MIN >= DATA_MAX);
    }

    #[test]
    fn result_opcodes_satisfy_result_factor_relation() {
        assert_eq!(super::CREATE_CONTROL_SESSION_RESULT, 105);
        assert_eq!(super::SET_JOB_ATTRIBUTE_RESULT, 155);
        assert!(u8::from(super::SET_JOB_ATTRIBUTE_RESULT) < CTRL_MAX);
    }
}
