//! The message child carried inside every Message box.
//!
//! Both directions of the post-handshake stream move data in one child per
//! packet. The child acknowledges by cumulative prefix (plus extended
//! ranges this implementation carries but does not interpret) and names the
//! inbound message that triggered the acknowledgment, which is what gives
//! the scheduler its RTT samples. All integer fields are little-endian, per
//! the protocol document.

use crate::error::PacketError;

/// Fixed part of a child: ids, acknowledgment fields, flags and position.
pub const HEADER_LEN: usize = 48;

/// A child's data block never exceeds one send block.
pub const MAX_DATA: usize = 1024;

/// Encoded children are padded to a 16-byte boundary.
const ALIGN: usize = 16;

const FLAG_SUCCESS: u16 = 2048;
const FLAG_FAILURE: u16 = 4096;
const DATA_LEN_MASK: u16 = 0x07FF;

/// One message child, borrowing its data from the decrypted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child<'a> {
    /// Sender-chosen id of this message; zero for pure acknowledgments.
    pub id: u32,
    /// Id of the received message this one acknowledges; zero if none.
    pub ack_id: u32,
    /// Cumulative acknowledgment: count of leading stream bytes received.
    pub ack_prefix: u64,
    /// Orderly end of stream at `position + data.len()`.
    pub success: bool,
    /// Abrupt end of stream at `position + data.len()`.
    pub failure: bool,
    /// Stream position of the first data byte.
    pub position: u64,
    pub data: &'a [u8],
}

impl<'a> Child<'a> {
    /// A data-less child acknowledging `ack_id` up through `ack_prefix`.
    pub fn ack(ack_id: u32, ack_prefix: u64) -> Self {
        Self {
            id: 0,
            ack_id,
            ack_prefix,
            success: false,
            failure: false,
            position: 0,
            data: &[],
        }
    }

    /// Encode into a fresh buffer, zero padded to a 16-byte boundary.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.data.len() <= MAX_DATA);
        let len = (HEADER_LEN + self.data.len() + ALIGN - 1) / ALIGN * ALIGN;
        let mut out = vec![0u8; len];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.ack_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.ack_prefix.to_le_bytes());
        // Extended acknowledgment ranges [16..38) stay zero: this
        // implementation acknowledges by prefix only.
        let mut flags = self.data.len() as u16 & DATA_LEN_MASK;
        if self.success {
            flags |= FLAG_SUCCESS;
        }
        if self.failure {
            flags |= FLAG_FAILURE;
        }
        out[38..40].copy_from_slice(&flags.to_le_bytes());
        out[40..48].copy_from_slice(&self.position.to_le_bytes());
        out[HEADER_LEN..HEADER_LEN + self.data.len()].copy_from_slice(self.data);
        out
    }

    /// Decode a child from a decrypted Message payload. Trailing padding is
    /// ignored; a data length overrunning the payload is malformed.
    pub fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Malformed);
        }
        let id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let ack_id = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&buf[8..16]);
        let ack_prefix = u64::from_le_bytes(prefix);
        let flags = u16::from_le_bytes([buf[38], buf[39]]);
        let data_len = (flags & DATA_LEN_MASK) as usize;
        if data_len > MAX_DATA || HEADER_LEN + data_len > buf.len() {
            return Err(PacketError::Malformed);
        }
        let mut position = [0u8; 8];
        position.copy_from_slice(&buf[40..48]);
        Ok(Self {
            id,
            ack_id,
            ack_prefix,
            success: flags & FLAG_SUCCESS != 0,
            failure: flags & FLAG_FAILURE != 0,
            position: u64::from_le_bytes(position),
            data: &buf[HEADER_LEN..HEADER_LEN + data_len],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_child_roundtrip() {
        let child = Child {
            id: 7,
            ack_id: 3,
            ack_prefix: 4096,
            success: false,
            failure: false,
            position: 2048,
            data: b"some stream bytes",
        };
        let encoded = child.encode();
        assert_eq!(encoded.len() % ALIGN, 0);
        assert_eq!(Child::decode(&encoded).unwrap(), child);
    }

    #[test]
    fn pure_ack_is_header_only() {
        let ack = Child::ack(9, 1234);
        let encoded = ack.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        let decoded = Child::decode(&encoded).unwrap();
        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.ack_id, 9);
        assert_eq!(decoded.ack_prefix, 1234);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn end_of_stream_flags_survive() {
        let child = Child {
            id: 1,
            ack_id: 0,
            ack_prefix: 0,
            success: true,
            failure: false,
            position: 99,
            data: b"fin",
        };
        let encoded = child.encode();
        let decoded = Child::decode(&encoded).unwrap();
        assert!(decoded.success);
        assert!(!decoded.failure);
        assert_eq!(decoded.data, b"fin");
    }

    #[test]
    fn maximum_data_block() {
        let data = vec![0xAB; MAX_DATA];
        let child = Child {
            id: 2,
            ack_id: 0,
            ack_prefix: 0,
            success: false,
            failure: false,
            position: 0,
            data: &data,
        };
        let encoded = child.encode();
        assert_eq!(encoded.len(), HEADER_LEN + MAX_DATA);
        assert_eq!(Child::decode(&encoded).unwrap().data, &data[..]);
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(
            Child::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::Malformed)
        );
    }

    #[test]
    fn rejects_data_length_past_payload() {
        let mut encoded = Child::ack(1, 1).encode();
        // Claim 32 data bytes that are not there.
        encoded[38..40].copy_from_slice(&32u16.to_le_bytes());
        assert_eq!(Child::decode(&encoded), Err(PacketError::Malformed));
    }
}
