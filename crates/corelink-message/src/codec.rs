use bytemuck::Pod;
use serde::{Serialize, de::DeserializeOwned};

use crate::{ArchiveKind, MessageError};

/// Serializes a body with the codec selected by `kind`. `Raw` is not a
/// serde encoding; route plain-old-data through [`encode_raw`] instead.
pub fn encode_body<T: Serialize>(value: &T, kind: ArchiveKind) -> Result<Vec<u8>, MessageError> {
    match kind {
        ArchiveKind::PortableBinary => Ok(bitcode::serialize(value)?),
        ArchiveKind::Binary => Ok(bincode::serialize(value)?),
        ArchiveKind::Text => Ok(serde_json::to_vec(value)?),
        ArchiveKind::Xml => Ok(serde_xml_rs::to_string(value)?.into_bytes()),
        ArchiveKind::Raw => Err(MessageError::ArchiveKind),
    }
}

pub fn decode_body<T: DeserializeOwned>(bytes: &[u8], kind: ArchiveKind) -> Result<T, MessageError> {
    match kind {
        ArchiveKind::PortableBinary => Ok(bitcode::deserialize(bytes)?),
        ArchiveKind::Binary => Ok(bincode::deserialize(bytes)?),
        ArchiveKind::Text => Ok(serde_json::from_slice(bytes)?),
        ArchiveKind::Xml => Ok(serde_xml_rs::from_reader(bytes)?),
        ArchiveKind::Raw => Err(MessageError::ArchiveKind),
    }
}

/// Byte-for-byte copy of a plain-old-data value.
pub fn encode_raw<T: Pod>(value: &T) -> Vec<u8> {
    bytemuck::bytes_of(value).to_vec()
}

pub fn decode_raw<T: Pod>(bytes: &[u8]) -> Result<T, MessageError> {
    if bytes.len() != core::mem::size_of::<T>() {
        return Err(MessageError::Length);
    }
    Ok(bytemuck::pod_read_unaligned(bytes))
}

#[cfg(test)]
mod tests {
    use bytemuck::{Pod, Zeroable};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        data: Vec<f64>,
    }

    fn sample() -> Sample {
        Sample { name: "MyMessage".into(), data: vec![1.0, 2.0, 3.0, 4.0, 5.0] }
    }

    #[test]
    fn serde_kinds_roundtrip() {
        for kind in [ArchiveKind::PortableBinary, ArchiveKind::Binary, ArchiveKind::Text] {
            let bytes = encode_body(&sample(), kind).unwrap();
            let back: Sample = decode_body(&bytes, kind).unwrap();
            assert_eq!(back, sample());
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct FlatSample {
        name: String,
        value: f64,
    }

    #[test]
    fn xml_roundtrips_flat_structs() {
        let original = FlatSample { name: "xml".into(), value: 2.5 };
        let bytes = encode_body(&original, ArchiveKind::Xml).unwrap();
        let back: FlatSample = decode_body(&bytes, ArchiveKind::Xml).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn raw_through_serde_entry_points_fails() {
        assert!(matches!(
            encode_body(&sample(), ArchiveKind::Raw),
            Err(MessageError::ArchiveKind)
        ));
        assert!(matches!(
            decode_body::<Sample>(b"xx", ArchiveKind::Raw),
            Err(MessageError::ArchiveKind)
        ));
    }

    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Telemetry {
        sequence: u32,
        flags: u32,
        reading: f64,
    }

    #[test]
    fn raw_pod_roundtrips_byte_identically() {
        let original = Telemetry { sequence: 7, flags: 0xdead_beef, reading: -12.75 };
        let bytes = encode_raw(&original);
        assert_eq!(bytes.len(), core::mem::size_of::<Telemetry>());
        let back: Telemetry = decode_raw(&bytes).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn raw_length_mismatch_is_an_error() {
        let bytes = encode_raw(&Telemetry { sequence: 1, flags: 2, reading: 3.0 });
        assert!(matches!(
            decode_raw::<Telemetry>(&bytes[..bytes.len() - 1]),
            Err(MessageError::Length)
        ));
    }
}
