// RTMP chunk-stream codec: basic/message header framing, reassembly and
// outbound chunking for the messages the session controller exchanges.
//
// Header-compression choice mirrors the reference client: format 0 never
// touches the cached timestamp delta, so a run of format-0 messages on a
// chunk-stream-id leaves the delta stale until a format-1/2 message refreshes
// it. Format-3 continuations rely on that cache, extended-timestamp or not.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, RtmpError};
use crate::io_adapter::{read_exact, write_all};
use crate::rtmp::constants::{
    RTMP_CHUNK_STREAM_ID_MAX, RTMP_CHUNK_TYPE_0, RTMP_CHUNK_TYPE_1, RTMP_CHUNK_TYPE_2,
    RTMP_CHUNK_TYPE_3,
};

const EXTENDED_TIMESTAMP_MARKER: u32 = 0xff_ff_ff;

/// A fully reassembled RTMP message, ready to be dispatched by type id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpPacket {
    pub chunk_stream_id: u32,
    pub timestamp: u32,
    pub timestamp_delta: u32,
    pub length: u32,
    pub type_id: u8,
    pub stream_id: u32,
    pub body: Vec<u8>,
}

impl RtmpPacket {
    pub fn new(chunk_stream_id: u32, type_id: u8, stream_id: u32, body: Vec<u8>) -> RtmpPacket {
        RtmpPacket {
            chunk_stream_id,
            timestamp: 0,
            timestamp_delta: 0,
            length: body.len() as u32,
            type_id,
            stream_id,
            body,
        }
    }
}

/// Per chunk-stream-id cache entry, shared between the header-compression
/// codec and the in-progress message reassembly buffer. One cache drives
/// decode, a second identically-shaped cache drives encode.
#[derive(Debug, Clone, Default)]
struct ChunkCacheEntry {
    timestamp: u32,
    timestamp_delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    /// Bytes already collected for the message currently being assembled (rx) or
    /// sent (tx), or 0 if no message is in flight on this chunk-stream-id.
    temporary_length: u32,
    partial_body: Vec<u8>,
}

/// Inbound chunk-stream state: one cache entry per chunk-stream-id seen so far.
#[derive(Debug, Default)]
pub struct RxChunkState {
    entries: HashMap<u32, ChunkCacheEntry>,
    chunk_size: u32,
}

impl RxChunkState {
    pub fn new(chunk_size: u32) -> RxChunkState {
        RxChunkState {
            entries: HashMap::new(),
            chunk_size,
        }
    }

    pub fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size;
    }
}

/// Outbound chunk-stream state mirroring `RxChunkState`, keyed the same way.
#[derive(Debug, Default)]
pub struct TxChunkState {
    entries: HashMap<u32, ChunkCacheEntry>,
    chunk_size: u32,
}

impl TxChunkState {
    pub fn new(chunk_size: u32) -> TxChunkState {
        TxChunkState {
            entries: HashMap::new(),
            chunk_size,
        }
    }

    pub fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size;
    }
}

fn encode_basic_header(format_type: u8, chunk_stream_id: u32, out: &mut Vec<u8>) -> Result<()> {
    if chunk_stream_id >= RTMP_CHUNK_STREAM_ID_MAX {
        return Err(RtmpError::InvalidArgument(format!(
            "chunk_stream_id {} exceeds maximum of {}",
            chunk_stream_id, RTMP_CHUNK_STREAM_ID_MAX
        )));
    }

    let fmt_bits = format_type << 6;
    if chunk_stream_id < 64 {
        out.push(fmt_bits | chunk_stream_id as u8);
    } else if chunk_stream_id < 320 {
        out.push(fmt_bits);
        out.push((chunk_stream_id - 64) as u8);
    } else {
        out.push(fmt_bits | 1);
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, (chunk_stream_id - 64) as u16);
        out.extend_from_slice(&buf);
    }
    Ok(())
}

async fn read_basic_header<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(u8, u32)> {
    let first = read_exact(stream, 1).await?[0];
    let format_type = first >> 6;
    let low = first & 0x3f;

    let chunk_stream_id = match low {
        0 => {
            let b = read_exact(stream, 1).await?[0];
            64 + b as u32
        }
        1 => {
            let b = read_exact(stream, 2).await?;
            64 + BigEndian::read_u16(&b) as u32
        }
        other => other as u32,
    };

    Ok((format_type, chunk_stream_id))
}

/// Reads and reassembles exactly one complete RTMP message from `stream`,
/// consuming as many chunks as the message's length demands.
pub async fn read_message<S: AsyncRead + Unpin>(
    stream: &mut S,
    state: &mut RxChunkState,
) -> Result<RtmpPacket> {
    loop {
        let (format_type, chunk_stream_id) = read_basic_header(stream).await?;

        let had_entry = state.entries.contains_key(&chunk_stream_id);
        if !had_entry && format_type != RTMP_CHUNK_TYPE_0 {
            return Err(RtmpError::ProtocolViolation(format!(
                "first chunk seen for chunk_stream_id {} used format type {}, expected 0",
                chunk_stream_id, format_type
            )));
        }
        let mut entry = state.entries.remove(&chunk_stream_id).unwrap_or_default();

        match format_type {
            RTMP_CHUNK_TYPE_0 => {
                let header = read_exact(stream, 11).await?;
                let mut timestamp = BigEndian::read_u24(&header[0..3]);
                let length = BigEndian::read_u24(&header[3..6]);
                let type_id = header[6];
                let stream_id = LittleEndian::read_u32(&header[7..11]);

                if timestamp == EXTENDED_TIMESTAMP_MARKER {
                    let ext = read_exact(stream, 4).await?;
                    timestamp = BigEndian::read_u32(&ext);
                }

                entry.timestamp = timestamp;
                entry.length = length;
                entry.type_id = type_id;
                entry.stream_id = stream_id;
            }
            RTMP_CHUNK_TYPE_1 => {
                let header = read_exact(stream, 7).await?;
                let mut delta = BigEndian::read_u24(&header[0..3]);
                let length = BigEndian::read_u24(&header[3..6]);
                let type_id = header[6];

                if delta == EXTENDED_TIMESTAMP_MARKER {
                    let ext = read_exact(stream, 4).await?;
                    delta = BigEndian::read_u32(&ext);
                }

                entry.timestamp_delta = delta;
                entry.length = length;
                entry.type_id = type_id;
                if entry.temporary_length == 0 {
                    entry.timestamp = entry.timestamp.wrapping_add(delta);
                }
            }
            RTMP_CHUNK_TYPE_2 => {
                let header = read_exact(stream, 3).await?;
                let mut delta = BigEndian::read_u24(&header[0..3]);

                if delta == EXTENDED_TIMESTAMP_MARKER {
                    let ext = read_exact(stream, 4).await?;
                    delta = BigEndian::read_u32(&ext);
                }

                entry.timestamp_delta = delta;
                if entry.temporary_length == 0 {
                    entry.timestamp = entry.timestamp.wrapping_add(delta);
                }
            }
            _ => {
                // Format 3: no header fields of its own. The extended-timestamp
                // field is only present if the cached delta from the last
                // format-1/2 chunk on this chunk-stream-id overflowed 3 bytes.
                if entry.timestamp_delta > EXTENDED_TIMESTAMP_MARKER {
                    let ext = read_exact(stream, 4).await?;
                    entry.timestamp_delta = BigEndian::read_u32(&ext);
                }
                if entry.temporary_length == 0 {
                    entry.timestamp = entry.timestamp.wrapping_add(entry.timestamp_delta);
                }
            }
        }

        let body_len = std::cmp::min(state.chunk_size, entry.length - entry.temporary_length);
        if entry.temporary_length == 0 {
            entry.partial_body = vec![0u8; entry.length as usize];
        }

        if body_len > 0 {
            let chunk = read_exact(stream, body_len as usize).await?;
            let start = entry.temporary_length as usize;
            entry.partial_body[start..start + chunk.len()].copy_from_slice(&chunk);
            entry.temporary_length += body_len;
        }

        if entry.temporary_length == entry.length {
            let packet = RtmpPacket {
                chunk_stream_id,
                timestamp: entry.timestamp,
                timestamp_delta: entry.timestamp_delta,
                length: entry.length,
                type_id: entry.type_id,
                stream_id: entry.stream_id,
                body: std::mem::take(&mut entry.partial_body),
            };
            entry.temporary_length = 0;
            state.entries.insert(chunk_stream_id, entry);
            return Ok(packet);
        }

        state.entries.insert(chunk_stream_id, entry);
    }
}

/// Picks the outbound header-compression format per the reference algorithm:
/// format 0 when the stream id changed or there's no prior chunk on this
/// chunk-stream-id, format 1 on a type/length change, format 3 when the gap
/// between messages matches the last seen delta exactly, format 0 again on a
/// timestamp regression, and format 2 otherwise.
fn choose_format_type(packet: &RtmpPacket, bak: Option<&ChunkCacheEntry>) -> u8 {
    let bak = match bak {
        Some(b) => b,
        None => return RTMP_CHUNK_TYPE_0,
    };

    if packet.stream_id != bak.stream_id {
        return RTMP_CHUNK_TYPE_0;
    }

    if packet.type_id != bak.type_id || packet.length != bak.length {
        return RTMP_CHUNK_TYPE_1;
    }

    if packet.timestamp == bak.timestamp.wrapping_add(2 * bak.timestamp_delta) {
        RTMP_CHUNK_TYPE_3
    } else if packet.timestamp < bak.timestamp {
        RTMP_CHUNK_TYPE_0
    } else {
        RTMP_CHUNK_TYPE_2
    }
}

fn encode_message_header(
    format_type: u8,
    packet: &RtmpPacket,
    timestamp_delta: u32,
    out: &mut Vec<u8>,
) {
    match format_type {
        RTMP_CHUNK_TYPE_0 => {
            let mut buf = [0u8; 3];
            BigEndian::write_u24(
                &mut buf,
                if packet.timestamp >= EXTENDED_TIMESTAMP_MARKER {
                    EXTENDED_TIMESTAMP_MARKER
                } else {
                    packet.timestamp
                },
            );
            out.extend_from_slice(&buf);

            let mut len_buf = [0u8; 3];
            BigEndian::write_u24(&mut len_buf, packet.length);
            out.extend_from_slice(&len_buf);
            out.push(packet.type_id);
            let mut sid_buf = [0u8; 4];
            LittleEndian::write_u32(&mut sid_buf, packet.stream_id);
            out.extend_from_slice(&sid_buf);

            if packet.timestamp >= EXTENDED_TIMESTAMP_MARKER {
                let mut ext = [0u8; 4];
                BigEndian::write_u32(&mut ext, packet.timestamp);
                out.extend_from_slice(&ext);
            }
        }
        RTMP_CHUNK_TYPE_1 => {
            let mut buf = [0u8; 3];
            BigEndian::write_u24(
                &mut buf,
                if timestamp_delta >= EXTENDED_TIMESTAMP_MARKER {
                    EXTENDED_TIMESTAMP_MARKER
                } else {
                    timestamp_delta
                },
            );
            out.extend_from_slice(&buf);

            let mut len_buf = [0u8; 3];
            BigEndian::write_u24(&mut len_buf, packet.length);
            out.extend_from_slice(&len_buf);
            out.push(packet.type_id);

            if timestamp_delta >= EXTENDED_TIMESTAMP_MARKER {
                let mut ext = [0u8; 4];
                BigEndian::write_u32(&mut ext, timestamp_delta);
                out.extend_from_slice(&ext);
            }
        }
        RTMP_CHUNK_TYPE_2 => {
            if timestamp_delta >= EXTENDED_TIMESTAMP_MARKER {
                let mut buf = [0u8; 3];
                BigEndian::write_u24(&mut buf, EXTENDED_TIMESTAMP_MARKER);
                out.extend_from_slice(&buf);
                let mut ext = [0u8; 4];
                BigEndian::write_u32(&mut ext, timestamp_delta);
                out.extend_from_slice(&ext);
            } else {
                let mut buf = [0u8; 3];
                BigEndian::write_u24(&mut buf, timestamp_delta);
                out.extend_from_slice(&buf);
            }
        }
        _ => {
            if timestamp_delta >= EXTENDED_TIMESTAMP_MARKER {
                let mut ext = [0u8; 4];
                BigEndian::write_u32(&mut ext, timestamp_delta);
                out.extend_from_slice(&ext);
            }
        }
    }
}

/// Writes one RTMP message to `stream`, splitting it into chunks no larger
/// than the negotiated outbound chunk size. `force_format_type` overrides the
/// header-compression algorithm (`Some(0..=3)`), as used for continuation
/// chunks which are always sent as format 3.
async fn send_with_format<S: AsyncWrite + Unpin>(
    stream: &mut S,
    state: &mut TxChunkState,
    mut packet: RtmpPacket,
    force_format_type: Option<u8>,
) -> Result<()> {
    let bak = state.entries.get(&packet.chunk_stream_id).cloned();

    let format_type = match force_format_type {
        Some(f) if f <= 3 => f,
        _ => choose_format_type(&packet, bak.as_ref()),
    };

    let timestamp_delta = match format_type {
        RTMP_CHUNK_TYPE_1 | RTMP_CHUNK_TYPE_2 => {
            let base = bak.as_ref().map(|b| b.timestamp).unwrap_or(0);
            packet.timestamp.wrapping_sub(base)
        }
        RTMP_CHUNK_TYPE_3 => bak.as_ref().map(|b| b.timestamp_delta).unwrap_or(0),
        _ => packet.timestamp_delta,
    };
    packet.timestamp_delta = timestamp_delta;

    let mut send_data = Vec::new();
    encode_basic_header(format_type, packet.chunk_stream_id, &mut send_data)?;
    encode_message_header(format_type, &packet, timestamp_delta, &mut send_data);

    let already_sent = bak
        .as_ref()
        .filter(|b| b.type_id == packet.type_id && b.length == packet.length)
        .map(|b| b.temporary_length)
        .unwrap_or(0);
    let body_len = std::cmp::min(state.chunk_size, packet.length - already_sent);
    send_data
        .extend_from_slice(&packet.body[already_sent as usize..(already_sent + body_len) as usize]);

    write_all(stream, &send_data).await?;

    let new_sent = already_sent + body_len;
    state.entries.insert(
        packet.chunk_stream_id,
        ChunkCacheEntry {
            timestamp: packet.timestamp,
            timestamp_delta,
            length: packet.length,
            type_id: packet.type_id,
            stream_id: packet.stream_id,
            temporary_length: if new_sent == packet.length { 0 } else { new_sent },
            partial_body: Vec::new(),
        },
    );

    if new_sent != packet.length {
        return Box::pin(send_with_format(stream, state, packet, Some(RTMP_CHUNK_TYPE_3))).await;
    }

    Ok(())
}

/// Writes one RTMP message using the standard header-compression algorithm.
pub async fn write_message<S: AsyncWrite + Unpin>(
    stream: &mut S,
    state: &mut TxChunkState,
    packet: RtmpPacket,
) -> Result<()> {
    send_with_format(stream, state, packet, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_single_chunk_message() {
        let mut tx = TxChunkState::new(128);
        let packet = RtmpPacket::new(3, 20, 0, b"hello world".to_vec());

        let mut buf = Vec::new();
        write_message(&mut buf, &mut tx, packet.clone()).await.unwrap();

        let mut rx = RxChunkState::new(128);
        let mut cursor = Cursor::new(buf);
        let decoded = read_message(&mut cursor, &mut rx).await.unwrap();

        assert_eq!(decoded.chunk_stream_id, 3);
        assert_eq!(decoded.type_id, 20);
        assert_eq!(decoded.body, b"hello world");
    }

    #[tokio::test]
    async fn splits_and_reassembles_a_multi_chunk_message() {
        let mut tx = TxChunkState::new(5);
        let body: Vec<u8> = (0..37u8).collect();
        let packet = RtmpPacket::new(4, 9, 1, body.clone());

        let mut buf = Vec::new();
        write_message(&mut buf, &mut tx, packet).await.unwrap();

        let mut rx = RxChunkState::new(5);
        let mut cursor = Cursor::new(buf);
        let decoded = read_message(&mut cursor, &mut rx).await.unwrap();

        assert_eq!(decoded.body, body);
        assert_eq!(decoded.stream_id, 1);
    }

    #[tokio::test]
    async fn second_message_on_same_stream_uses_compressed_format() {
        let mut tx = TxChunkState::new(256);
        let mut rx = RxChunkState::new(256);
        let mut buf = Vec::new();

        let mut p1 = RtmpPacket::new(5, 8, 1, vec![1, 2, 3]);
        p1.timestamp = 1000;
        write_message(&mut buf, &mut tx, p1).await.unwrap();

        let mut p2 = RtmpPacket::new(5, 8, 1, vec![4, 5, 6]);
        p2.timestamp = 1040;
        write_message(&mut buf, &mut tx, p2).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let first = read_message(&mut cursor, &mut rx).await.unwrap();
        let second = read_message(&mut cursor, &mut rx).await.unwrap();

        assert_eq!(first.timestamp, 1000);
        assert_eq!(second.timestamp, 1040);
        assert_eq!(second.body, vec![4, 5, 6]);
    }

    #[test]
    fn chunk_stream_id_over_max_is_rejected() {
        let mut out = Vec::new();
        let result = encode_basic_header(0, RTMP_CHUNK_STREAM_ID_MAX, &mut out);
        assert!(matches!(result, Err(RtmpError::InvalidArgument(_))));
    }

    #[test]
    fn basic_header_escapes_each_chunk_stream_id_range() {
        let mut small = Vec::new();
        encode_basic_header(0, 10, &mut small).unwrap();
        assert_eq!(small.len(), 1);

        let mut mid = Vec::new();
        encode_basic_header(0, 200, &mut mid).unwrap();
        assert_eq!(mid.len(), 2);

        let mut large = Vec::new();
        encode_basic_header(0, 1000, &mut large).unwrap();
        assert_eq!(large.len(), 3);
    }
}
