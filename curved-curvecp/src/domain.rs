//! Domain-name codec for the Initiate packet.
//!
//! The 256-byte domain region holds a sequence of length-prefixed labels,
//! terminated by a zero length byte (or by the end of the region when the
//! labels fill it exactly). Labels are 1-63 bytes and join with `.`.

use crate::error::PacketError;

/// Size of the domain region inside an Initiate's plaintext.
pub const DOMAIN_LEN: usize = 256;

/// Decode a label sequence into a dotted name.
///
/// Rejects a label longer than 63 bytes, a label that runs past the region,
/// and an empty result.
pub fn decode(mut region: &[u8]) -> Result<String, PacketError> {
    let mut labels: Vec<&[u8]> = Vec::new();
    while !region.is_empty() {
        let len = region[0] as usize;
        if len == 0 {
            break;
        }
        if len > 63 || len > region.len() - 1 {
            return Err(PacketError::Domain);
        }
        labels.push(&region[1..1 + len]);
        region = &region[1 + len..];
    }
    if labels.is_empty() {
        return Err(PacketError::Domain);
    }
    let mut name = String::new();
    for (i, label) in labels.iter().enumerate() {
        if i > 0 {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));
    }
    Ok(name)
}

/// Encode a dotted name into a fixed 256-byte region, zero padded.
///
/// Fails when a label is empty, longer than 63 bytes, or the encoding does
/// not fit.
pub fn encode(name: &str, out: &mut [u8; DOMAIN_LEN]) -> Result<(), PacketError> {
    out.fill(0);
    let mut at = 0;
    for label in name.split('.') {
        let bytes = label.as_bytes();
        if bytes.is_empty() || bytes.len() > 63 {
            return Err(PacketError::Domain);
        }
        // Leave room for the terminating zero length byte.
        if at + 1 + bytes.len() + 1 > DOMAIN_LEN {
            return Err(PacketError::Domain);
        }
        out[at] = bytes.len() as u8;
        out[at + 1..at + 1 + bytes.len()].copy_from_slice(bytes);
        at += 1 + bytes.len();
    }
    if at == 0 {
        return Err(PacketError::Domain);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(name: &str) -> [u8; DOMAIN_LEN] {
        let mut r = [0u8; DOMAIN_LEN];
        encode(name, &mut r).unwrap();
        r
    }

    #[test]
    fn roundtrip() {
        assert_eq!(decode(&region("example.test")).unwrap(), "example.test");
        assert_eq!(decode(&region("localhost")).unwrap(), "localhost");
        assert_eq!(decode(&region("a.b.c.d")).unwrap(), "a.b.c.d");
    }

    #[test]
    fn rejects_oversized_label() {
        let mut r = [0u8; DOMAIN_LEN];
        r[0] = 64; // one past the maximum label length
        assert_eq!(decode(&r), Err(PacketError::Domain));
    }

    #[test]
    fn rejects_label_past_region_end() {
        let mut r = [0u8; 4];
        r[0] = 10;
        assert_eq!(decode(&r), Err(PacketError::Domain));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(decode(&[0u8; DOMAIN_LEN]), Err(PacketError::Domain));
        let mut out = [0u8; DOMAIN_LEN];
        assert_eq!(encode("", &mut out), Err(PacketError::Domain));
    }

    #[test]
    fn accepts_labels_filling_region_exactly() {
        // Four 63-byte labels plus their length bytes consume the region
        // with no room for a terminator; the region boundary terminates.
        let mut r = [0u8; DOMAIN_LEN];
        for chunk in r.chunks_mut(64) {
            chunk[0] = 63;
            chunk[1..].fill(b'x');
        }
        let label = "x".repeat(63);
        let want = format!("{label}.{label}.{label}.{label}");
        assert_eq!(decode(&r).unwrap(), want);
    }

    #[test]
    fn rejects_encoding_that_does_not_fit() {
        let label = "x".repeat(63);
        let name = std::iter::repeat(label).take(5).collect::<Vec<_>>().join(".");
        let mut out = [0u8; DOMAIN_LEN];
        assert_eq!(encode(&name, &mut out), Err(PacketError::Domain));
    }
}
