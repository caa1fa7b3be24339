use crate::record::Record;
use crate::Result;
use bytes::Bytes;

/// Self-describing JSON encoding with no schema round trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    pub fn encode<R: Record>(&self, record: &R) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(record)?))
    }

    pub fn decode<R: Record>(data: &[u8]) -> Result<R> {
        serde_json::from_slice(data).map_err(Into::into)
    }
}
