//! The on-the-wire message envelope carried inside a sync protocol `SYNC`
//! payload (§4.7). Reuses the y-protocols-style varUint framing and the
//! three-message sync handshake (`SyncStep1`/`SyncStep2`/`Update`) used
//! elsewhere in this codebase for Y-CRDT document sync, generalized here to
//! the per-node mergeable documents instead of a single workspace document.

use crate::error::{AmfsError, Result};

/// One sync handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Announces the sender's state vector so the peer can compute a diff.
    SyncStep1(Vec<u8>),
    /// A diff computed against a state vector from a prior `SyncStep1`.
    SyncStep2(Vec<u8>),
    /// An incremental update not tied to a handshake round.
    Update(Vec<u8>),
}

fn write_var_uint(buf: &mut Vec<u8>, mut num: u64) {
    loop {
        let byte = (num & 0x7f) as u8;
        num >>= 7;
        if num == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn read_var_uint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| AmfsError::Crdt("truncated varUint".to_string()))?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_var_uint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn read_bytes<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len = read_var_uint(data, pos)? as usize;
    let end = *pos + len;
    let slice = data
        .get(*pos..end)
        .ok_or_else(|| AmfsError::Crdt("truncated payload".to_string()))?;
    *pos = end;
    Ok(slice)
}

impl SyncMessage {
    /// Encode this message as a standalone frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            SyncMessage::SyncStep1(sv) => {
                write_var_uint(&mut buf, 0);
                write_var_uint(&mut buf, 0);
                write_bytes(&mut buf, sv);
            }
            SyncMessage::SyncStep2(update) => {
                write_var_uint(&mut buf, 0);
                write_var_uint(&mut buf, 1);
                write_bytes(&mut buf, update);
            }
            SyncMessage::Update(update) => {
                write_var_uint(&mut buf, 0);
                write_var_uint(&mut buf, 2);
                write_bytes(&mut buf, update);
            }
        }
        buf
    }

    /// Decode every message packed back-to-back in `data` (a peer may
    /// combine several messages, e.g. SyncStep2 followed by its own
    /// SyncStep1, in one frame).
    pub fn decode_all(data: &[u8]) -> Result<Vec<Self>> {
        let mut messages = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let message_type = read_var_uint(data, &mut pos)?;
            if message_type != 0 {
                return Err(AmfsError::Crdt(format!(
                    "unsupported sync message type {message_type}"
                )));
            }
            let sub_type = read_var_uint(data, &mut pos)?;
            let payload = read_bytes(data, &mut pos)?.to_vec();
            let message = match sub_type {
                0 => SyncMessage::SyncStep1(payload),
                1 => SyncMessage::SyncStep2(payload),
                2 => SyncMessage::Update(payload),
                other => {
                    return Err(AmfsError::Crdt(format!(
                        "unsupported sync sub-message type {other}"
                    )));
                }
            };
            messages.push(message);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_each_variant() {
        for msg in [
            SyncMessage::SyncStep1(vec![1, 2, 3]),
            SyncMessage::SyncStep2(vec![4, 5]),
            SyncMessage::Update(vec![]),
        ] {
            let encoded = msg.encode();
            let decoded = SyncMessage::decode_all(&encoded).unwrap();
            assert_eq!(decoded, vec![msg]);
        }
    }

    #[test]
    fn decodes_multiple_packed_messages() {
        let mut combined = SyncMessage::SyncStep2(vec![9]).encode();
        combined.extend(SyncMessage::SyncStep1(vec![1]).encode());
        let decoded = SyncMessage::decode_all(&combined).unwrap();
        assert_eq!(
            decoded,
            vec![
                SyncMessage::SyncStep2(vec![9]),
                SyncMessage::SyncStep1(vec![1])
            ]
        );
    }
}
