//! Length-prefixed record framing: `[len: u32 BE][payload]` repeated until
//! the input ends. No header, no trailer.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

const LENGTH_PREFIX: usize = 4;

/// Concatenate `records`, each behind its 4-byte big-endian length.
pub fn encode_frames<R: AsRef<[u8]>>(records: &[R]) -> Result<Vec<u8>, ProtocolError> {
    let total = records
        .iter()
        .map(|r| LENGTH_PREFIX + r.as_ref().len())
        .sum();
    let mut buf = Vec::with_capacity(total);
    for record in records {
        let record = record.as_ref();
        let len = u32::try_from(record.len()).map_err(|_| {
            ProtocolError::Serialization(format!("record of {} bytes is too large to frame", record.len()))
        })?;
        buf.put_u32(len);
        buf.put_slice(record);
    }
    Ok(buf)
}

/// Split a framed body back into its records.
pub fn decode_frames(mut data: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut records = Vec::new();
    while data.has_remaining() {
        if data.remaining() < LENGTH_PREFIX {
            return Err(ProtocolError::Decode(format!(
                "truncated length prefix ({} trailing bytes)",
                data.remaining()
            )));
        }
        let len = data.get_u32() as usize;
        if data.remaining() < len {
            return Err(ProtocolError::Decode(format!(
                "frame declares {len} bytes, {} remain",
                data.remaining()
            )));
        }
        records.push(data[..len].to_vec());
        data.advance(len);
    }
    Ok(records)
}
