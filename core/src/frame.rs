//! Datagram framing: gzip when it helps, pass plain ASCII through otherwise.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::constants::{GZIP_MARKER, MAX_DATAGRAM};
use crate::error::SyncError;

/// Encode one ASCII payload for the wire.
///
/// The payload is gzip-compressed and the compressed form (prefixed with the
/// `!` marker byte) is used only when it is actually shorter than the plain
/// text. Either way the result must stay under the datagram limit.
pub fn encode(payload: &str) -> Result<Vec<u8>, SyncError> {
    let plain = payload.as_bytes();

    let mut gz = GzEncoder::new(
        Vec::with_capacity(64 + plain.len() / 2),
        Compression::default(),
    );
    gz.write_all(plain)
        .map_err(|e| SyncError::PeerProtocolError(format!("gzip encode: {e}")))?;
    let packed = gz
        .finish()
        .map_err(|e| SyncError::PeerProtocolError(format!("gzip encode: {e}")))?;

    let datagram = if 1 + packed.len() < plain.len() {
        let mut out = Vec::with_capacity(1 + packed.len());
        out.push(GZIP_MARKER);
        out.extend_from_slice(&packed);
        out
    } else {
        plain.to_vec()
    };

    if datagram.len() >= MAX_DATAGRAM {
        return Err(SyncError::PeerProtocolError(format!(
            "{} byte frame exceeds the {} byte datagram limit",
            datagram.len(),
            MAX_DATAGRAM - 1
        )));
    }

    Ok(datagram)
}

/// Decode one datagram back into its ASCII payload.
pub fn decode(datagram: &[u8]) -> Result<String, SyncError> {
    if datagram.first() == Some(&GZIP_MARKER) {
        let mut text = String::new();
        GzDecoder::new(&datagram[1..])
            .read_to_string(&mut text)
            .map_err(|e| SyncError::PeerProtocolError(format!("gzip decode: {e}")))?;
        Ok(text.trim().to_string())
    } else {
        let text = std::str::from_utf8(datagram)
            .map_err(|_| SyncError::PeerProtocolError("datagram is not ASCII".to_string()))?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payloads_pass_through_unchanged() {
        // Nothing this small compresses below its own length plus the marker.
        let payload = "SYNC 1700000000";
        let frame = encode(payload).unwrap();
        assert_eq!(frame, payload.as_bytes());
        assert_eq!(decode(&frame).unwrap(), payload);
    }

    #[test]
    fn repetitive_payloads_are_compressed() {
        let payload = format!("LOG 1700000000 {}", "[1,1,1],".repeat(200));
        let frame = encode(&payload).unwrap();
        assert_eq!(frame[0], GZIP_MARKER);
        assert!(frame.len() < payload.len());
        assert_eq!(decode(&frame).unwrap(), payload.trim());
    }

    #[test]
    fn round_trip_is_identity() {
        for payload in ["Success", "REPORT {}", &"x".repeat(3000)] {
            let frame = encode(payload).unwrap();
            assert_eq!(decode(&frame).unwrap(), *payload);
        }
    }

    #[test]
    fn incompressible_oversize_payload_is_rejected() {
        // High-entropy hex defeats gzip, so neither form fits.
        let mut noise = String::new();
        let mut x: u32 = 0x12345678;
        while noise.len() < 8192 {
            x = x.wrapping_mul(1664525).wrapping_add(1013904223);
            noise.push_str(&format!("{x:08x}"));
        }
        assert!(encode(&noise).is_err());
    }

    #[test]
    fn compressible_oversize_payload_fits() {
        // 16k of zeros squeezes far under the limit.
        let payload = "0".repeat(16384);
        let frame = encode(&payload).unwrap();
        assert!(frame.len() < MAX_DATAGRAM);
        assert_eq!(decode(&frame).unwrap(), payload);
    }

    #[test]
    fn garbage_after_marker_is_an_error() {
        assert!(decode(&[GZIP_MARKER, 0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }
}
