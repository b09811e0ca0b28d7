//! Binary packet codec
//!
//! A packet is the payload of one length-prefixed frame (see
//! `sync::framing`). Layout, all integers big-endian:
//!
//! ```text
//! payload := u8 packet_type, body
//! Hello (0x01) := u16 version, u32 name_len, name
//! Sync  (0x02) := u32 entry_count, entry*
//! entry        := u32 kind_len, kind, u32 data_len, data
//! ```
//!
//! Every declared length is checked against the bytes actually present, so a
//! truncated or inflated packet is rejected instead of over-reading.

use bytes::{Buf, BufMut, BytesMut};

use super::snapshot::{ClipItem, Snapshot};
use crate::{Error, Result};

const PACKET_HELLO: u8 = 0x01;
const PACKET_SYNC: u8 = 0x02;

/// Identification exchanged right after the TLS handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u16,
    pub name: String,
}

/// All packets that travel over a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Hello(Hello),
    Sync(Snapshot),
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        match self {
            Packet::Hello(hello) => {
                buf.put_u8(PACKET_HELLO);
                buf.put_u16(hello.version);
                put_bytes(&mut buf, hello.name.as_bytes());
            }
            Packet::Sync(snapshot) => {
                buf.put_u8(PACKET_SYNC);
                buf.put_u32(snapshot.len() as u32);
                for item in snapshot.items() {
                    put_bytes(&mut buf, item.kind.as_bytes());
                    put_bytes(&mut buf, &item.data);
                }
            }
        }
        buf.to_vec()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        let buf = &mut payload;
        let packet = match get_u8(buf)? {
            PACKET_HELLO => {
                let version = get_u16(buf)?;
                let name = get_string(buf)?;
                Packet::Hello(Hello { version, name })
            }
            PACKET_SYNC => {
                let count = get_u32(buf)? as usize;
                // Each entry needs at least two length fields
                if count > buf.remaining() / 8 {
                    return Err(Error::Protocol(format!(
                        "entry count {} exceeds payload",
                        count
                    )));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let kind = get_string(buf)?;
                    let data = get_bytes(buf)?;
                    items.push(ClipItem { kind, data });
                }
                Packet::Sync(Snapshot::new(items))
            }
            other => {
                return Err(Error::Protocol(format!("unknown packet type 0x{:02x}", other)));
            }
        };

        if buf.has_remaining() {
            return Err(Error::Protocol(format!(
                "{} trailing bytes after packet",
                buf.remaining()
            )));
        }

        Ok(packet)
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn need(buf: &&[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::Protocol(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1, "packet type")?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    need(buf, 2, "u16 field")?;
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4, "length field")?;
    Ok(buf.get_u32())
}

fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    need(buf, len, "entry payload")?;
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    String::from_utf8(get_bytes(buf)?)
        .map_err(|e| Error::Protocol(format!("invalid utf-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{MIME_TYPE_HTML, MIME_TYPE_TEXT};

    fn sample() -> Snapshot {
        Snapshot::new(vec![
            ClipItem::new(MIME_TYPE_HTML, b"<i>x</i>".to_vec()),
            ClipItem::new(MIME_TYPE_TEXT, b"x".to_vec()),
            ClipItem::new("application/x-unknown", vec![0, 1, 2, 255]),
        ])
    }

    #[test]
    fn test_sync_layout() {
        let bytes = Packet::Sync(Snapshot::text("hi")).encode();
        let mut expected = vec![PACKET_SYNC, 0, 0, 0, 1, 0, 0, 0, 10];
        expected.extend_from_slice(b"text/plain");
        expected.extend_from_slice(&[0, 0, 0, 2]);
        expected.extend_from_slice(b"hi");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_unknown_kinds_survive_decoding() {
        let packet = Packet::Sync(sample());
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_hello_decoding() {
        let packet = Packet::Hello(Hello { version: 1, name: "desk".to_string() });
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let bytes = Packet::Sync(sample()).encode();
        for cut in [1, 5, bytes.len() / 2, bytes.len() - 1] {
            let result = Packet::decode(&bytes[..cut]);
            assert!(matches!(result, Err(Error::Protocol(_))), "cut at {}", cut);
        }
    }

    #[test]
    fn test_inflated_length_rejected() {
        let mut bytes = Packet::Sync(Snapshot::text("hi")).encode();
        // data_len of the only entry
        let pos = bytes.len() - 6;
        bytes[pos..pos + 4].copy_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(Packet::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_absurd_entry_count_rejected() {
        let bytes = vec![PACKET_SYNC, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(Packet::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unknown_packet_type_rejected() {
        assert!(matches!(Packet::decode(&[0x7f]), Err(Error::Protocol(_))));
        assert!(matches!(Packet::decode(&[]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Packet::Sync(Snapshot::text("hi")).encode();
        bytes.push(0);
        assert!(matches!(Packet::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_empty_snapshot() {
        let packet = Packet::Sync(Snapshot::default());
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }
}
