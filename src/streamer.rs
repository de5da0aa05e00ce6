//! Capture streamer (§4.5): serializes a list of per-transaction log
//! items into one or more fragmented `CAPTURED_DATA_RESULT` frames, each
//! bounded by `PACKET_DATA_MAX_LEN`.

use crate::error::CtcpError;
use crate::frame::WriteCursor;
use crate::logcapture::{Column, LogItem, TransactionLogList};
use crate::opcode::ResultCode;

/// One emitted `CAPTURED_DATA_RESULT` payload plus the result code and
/// transaction id it belongs to, in emission order.
#[derive(Debug)]
pub struct CapturedFrame {
    /// Transaction id this frame's items belong to.
    pub tid: u32,
    /// Encoded payload, ready to follow a `CAPTURED_DATA_RESULT` header.
    pub payload: Vec<u8>,
    /// `RC_SUCCESS` for the final frame of a transaction,
    /// `RC_SUCCESS_FRAGMENTED` for every frame before it.
    pub result_code: ResultCode,
}

fn write_column(cursor: &mut WriteCursor, column: &Column, max_len: usize) -> Result<(), CtcpError> {
    let name_len = u32::try_from(column.name.len()).map_err(|_| CtcpError::BufferOverflow)?;
    cursor.write_u32(name_len, max_len)?;
    cursor.write_bytes(&column.name, max_len)?;
    cursor.write_u32(column.r#type, max_len)?;
    let val_len = u32::try_from(column.value.len()).map_err(|_| CtcpError::BufferOverflow)?;
    cursor.write_u32(val_len, max_len)?;
    cursor.write_bytes(&column.value, max_len)?;
    Ok(())
}

fn write_columns(cursor: &mut WriteCursor, columns: &[Column], max_len: usize) -> Result<(), CtcpError> {
    let count = u32::try_from(columns.len()).map_err(|_| CtcpError::BufferOverflow)?;
    cursor.write_u32(count, max_len)?;
    for column in columns {
        write_column(cursor, column, max_len)?;
    }
    Ok(())
}

fn write_item(cursor: &mut WriteCursor, item: &LogItem, max_len: usize) -> Result<(), CtcpError> {
    let table_name = item.table_name();
    let name_len = u32::try_from(table_name.len()).map_err(|_| CtcpError::BufferOverflow)?;
    cursor.write_u32(name_len, max_len)?;
    cursor.write_bytes(table_name.as_bytes(), max_len)?;
    cursor.write_u32(item.stmt_type() as u32, max_len)?;
    match item {
        LogItem::Insert { set_columns, .. } => write_columns(cursor, set_columns, max_len),
        LogItem::Update { key_column, set_columns, .. } => {
            write_column(cursor, key_column, max_len)?;
            write_columns(cursor, set_columns, max_len)
        }
        LogItem::Delete { key_column, .. } => write_column(cursor, key_column, max_len),
    }
}

/// Serialize `trans_list` into one or more bounded frames, decrementing
/// each transaction's `ref_cnt` once its final frame has been built.
///
/// # Errors
///
/// Returns [`CtcpError::OversizedItem`] if a single item's serialized size
/// exceeds `packet_data_max_len` even in an otherwise-empty frame — a
/// fatal, tie-break condition per §4.5. Any other [`CtcpError`] indicates
/// an internal length-encoding failure (an item larger than `u32::MAX`).
pub fn encode_captured_data(
    trans_list: &mut [TransactionLogList],
    packet_data_max_len: usize,
) -> Result<Vec<CapturedFrame>, CtcpError> {
    let mut frames = Vec::new();

    for trans in trans_list.iter_mut() {
        let mut idx = 0usize;
        let item_count = trans.items.len();

        loop {
            let mut cursor = WriteCursor::new();
            cursor.write_u32(trans.tid, packet_data_max_len)?;
            let count_pos = cursor.pos();
            cursor.forward(4);

            let mut read = 0u32;
            while idx < item_count {
                let checkpoint = cursor.pos();
                #[expect(clippy::indexing_slicing, reason = "idx is bounded by item_count in the loop guard")]
                let item = &trans.items[idx];
                match write_item(&mut cursor, item, packet_data_max_len) {
                    Ok(()) => {
                        idx += 1;
                        read += 1;
                    }
                    Err(CtcpError::BufferOverflow) if read == 0 => {
                        return Err(CtcpError::OversizedItem { table_name: item.table_name().to_owned() });
                    }
                    Err(CtcpError::BufferOverflow) => {
                        cursor.rewind_to(checkpoint);
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }

            cursor.backfill_u32(count_pos, read);
            let is_last = idx >= item_count;
            let result_code = if is_last { ResultCode::Success } else { ResultCode::SuccessFragmented };
            frames.push(CapturedFrame {
                tid: trans.tid,
                payload: cursor.as_slice().to_vec(),
                result_code,
            });

            if is_last {
                trans.ref_cnt = trans.ref_cnt.saturating_sub(1);
                break;
            }
        }
    }

    Ok(frames)
}
