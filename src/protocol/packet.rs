// src/protocol/packet.rs
use crate::errors::MonitorError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// One framed RCON packet. On the wire:
/// `i32 size | i32 request_id | i32 packet_type | body1 0x00 | body2 0x00`,
/// all integers little-endian, with `size` counting every byte after the
/// size field itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub request_id: i32,
    pub packet_type: i32,
    pub body1: String,
    pub body2: String,
}

impl RconPacket {
    pub fn new(request_id: i32, packet_type: i32, body1: &str) -> Self {
        Self {
            request_id,
            packet_type,
            body1: body1.to_string(),
            body2: String::new(),
        }
    }

    /// Bytes following the size field: two i32s plus both bodies and their
    /// terminators.
    pub fn size(&self) -> i32 {
        (8 + self.body1.len() + 1 + self.body2.len() + 1) as i32
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.size() as usize + 4);
        payload.write_i32::<LittleEndian>(self.size()).unwrap();
        payload.write_i32::<LittleEndian>(self.request_id).unwrap();
        payload.write_i32::<LittleEndian>(self.packet_type).unwrap();
        payload.extend_from_slice(self.body1.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.body2.as_bytes());
        payload.push(0);
        payload
    }

    /// Decodes the payload that followed a size field. Both bodies must be
    /// present and null-terminated, and nothing may trail the second
    /// terminator.
    pub fn decode(payload: &[u8]) -> Result<Self, MonitorError> {
        let mut cursor = Cursor::new(payload);
        let request_id = cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| MonitorError::MalformedPacket("truncated header"))?;
        let packet_type = cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| MonitorError::MalformedPacket("truncated header"))?;

        let rest = &payload[8..];
        let (body1, rest) = read_terminated(rest)?;
        let (body2, rest) = read_terminated(rest)?;
        if !rest.is_empty() {
            return Err(MonitorError::ExtraDataInResponse);
        }

        Ok(Self {
            request_id,
            packet_type,
            body1,
            body2,
        })
    }
}

fn read_terminated(buf: &[u8]) -> Result<(String, &[u8]), MonitorError> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or(MonitorError::MalformedPacket("missing body terminator"))?;
    let body = String::from_utf8_lossy(&buf[..end]).into_owned();
    Ok((body, &buf[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_packet_lays_out_exact_bytes() {
        let packet = RconPacket::new(7, SERVERDATA_AUTH, "hunter2");
        let bytes = packet.encode();
        // size = 8 + 7 + 1 + 0 + 1 = 17
        assert_eq!(&bytes[0..4], &17i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3i32.to_le_bytes());
        assert_eq!(&bytes[12..19], b"hunter2");
        assert_eq!(&bytes[19..], &[0, 0]);
    }

    #[test]
    fn roundtrip_preserves_ascii_bodies() {
        let packets = [
            RconPacket::new(1, SERVERDATA_EXECCOMMAND, "status"),
            RconPacket::new(-1, SERVERDATA_AUTH_RESPONSE, ""),
            RconPacket {
                request_id: 42,
                packet_type: SERVERDATA_RESPONSE_VALUE,
                body1: "hostname: test".to_string(),
                body2: "tail".to_string(),
            },
        ];
        for packet in packets {
            let bytes = packet.encode();
            let decoded = RconPacket::decode(&bytes[4..]).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = RconPacket::new(5, SERVERDATA_RESPONSE_VALUE, "ok").encode();
        bytes.push(0x41);
        let err = RconPacket::decode(&bytes[4..]).unwrap_err();
        assert!(matches!(err, MonitorError::ExtraDataInResponse));
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let mut bytes = RconPacket::new(5, SERVERDATA_RESPONSE_VALUE, "ok").encode();
        bytes.pop();
        let err = RconPacket::decode(&bytes[4..]).unwrap_err();
        assert!(matches!(err, MonitorError::MalformedPacket(_)));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let err = RconPacket::decode(&[1, 0, 0]).unwrap_err();
        assert!(matches!(err, MonitorError::MalformedPacket(_)));
    }
}
