//! CBOR helpers for record-log frames.

use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(StoreError::codec)?;
    Ok(buf)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(bytes).map_err(StoreError::codec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn payload_is_encoded_as_byte_string() {
        let record = Record::new(vec![0xAB; 32]);
        let bytes = encode(&record).unwrap();
        // A CBOR byte string keeps the payload contiguous in the frame.
        assert!(bytes.windows(32).any(|w| w.iter().all(|b| *b == 0xAB)));
        let decoded: Record = decode(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let result: StoreResult<Record> = decode(&[0xff, 0x00]);
        assert!(matches!(result, Err(StoreError::Codec(_))));
    }
}
