// Plain RTMP handshake (C0/C1/S0/S1/C2/S2), no HMAC

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, RtmpError};
use crate::io_adapter::{read_exact, write_all};
use crate::log::Logger;
use crate::log_debug;

const RTMP_VERSION: u8 = 0x03;
const HANDSHAKE_RANDOM_SIZE: usize = 1528;
const HANDSHAKE_PACKET_SIZE: usize = 8 + HANDSHAKE_RANDOM_SIZE; // 1536

pub(crate) fn now_ms_since(start_time: Instant) -> u32 {
    start_time.elapsed().as_millis() as u32
}

/// Runs the client side of the plain RTMP handshake over `stream`.
///
/// `start_time` anchors the timestamps exchanged during the handshake; `timeout`
/// bounds the whole exchange, matching the per-operation timeout discipline used
/// for every other blocking I/O in this client.
pub async fn perform_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    start_time: Instant,
    timeout: Duration,
    logger: &Logger,
) -> Result<()> {
    tokio::time::timeout(timeout, handshake_inner(stream, start_time, logger))
        .await
        .map_err(|_| RtmpError::HandshakeFailed("timed out".to_string()))?
}

async fn handshake_inner<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    start_time: Instant,
    logger: &Logger,
) -> Result<()> {
    // C0 + C1

    let c1_time = now_ms_since(start_time);
    let mut c1_random = vec![0u8; HANDSHAKE_RANDOM_SIZE];
    rand::rng().fill(c1_random.as_mut_slice());

    let mut c0_c1 = Vec::with_capacity(1 + HANDSHAKE_PACKET_SIZE);
    c0_c1.push(RTMP_VERSION);
    c0_c1.extend_from_slice(&c1_time.to_be_bytes());
    c0_c1.extend_from_slice(&[0u8; 4]);
    c0_c1.extend_from_slice(&c1_random);

    write_all(stream, &c0_c1).await?;
    log_debug!(logger, "Sent C0+C1");

    // S0 + S1

    let s0_s1 = read_exact(stream, 1 + HANDSHAKE_PACKET_SIZE).await?;

    if s0_s1[0] != RTMP_VERSION {
        return Err(RtmpError::HandshakeFailed(format!(
            "unexpected S0 version: 0x{:02x}",
            s0_s1[0]
        )));
    }

    let s1 = &s0_s1[1..];
    let s1_time = &s1[0..4];
    let s1_random = &s1[8..8 + HANDSHAKE_RANDOM_SIZE];

    log_debug!(logger, "Received S0+S1");

    // C2

    let mut c2 = Vec::with_capacity(HANDSHAKE_PACKET_SIZE);
    c2.extend_from_slice(s1_time);
    c2.extend_from_slice(&now_ms_since(start_time).to_be_bytes());
    c2.extend_from_slice(s1_random);

    write_all(stream, &c2).await?;
    log_debug!(logger, "Sent C2");

    // S2

    let s2 = read_exact(stream, HANDSHAKE_PACKET_SIZE).await?;
    let s2_time = &s2[0..4];
    let s2_random = &s2[8..8 + HANDSHAKE_RANDOM_SIZE];

    if s2_time != c1_time.to_be_bytes() {
        return Err(RtmpError::HandshakeFailed(
            "S2 echoed timestamp does not match C1".to_string(),
        ));
    }

    if s2_random != c1_random.as_slice() {
        return Err(RtmpError::HandshakeFailed(
            "S2 echoed random payload does not match C1".to_string(),
        ));
    }

    log_debug!(logger, "Handshake complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    /// A minimal fake peer that performs the server side of the plain handshake
    /// over an in-memory duplex stream, so the client handshake can be tested
    /// without a real socket.
    async fn fake_server(mut server: tokio::io::DuplexStream) {
        let mut c0 = [0u8; 1];
        server.read_exact(&mut c0).await.unwrap();
        assert_eq!(c0[0], RTMP_VERSION);

        let mut c1 = [0u8; HANDSHAKE_PACKET_SIZE];
        server.read_exact(&mut c1).await.unwrap();

        let s1_time: u32 = 5;
        let mut s0_s1 = Vec::new();
        s0_s1.push(RTMP_VERSION);
        s0_s1.extend_from_slice(&s1_time.to_be_bytes());
        s0_s1.extend_from_slice(&[0u8; 4]);
        s0_s1.extend_from_slice(&[0xAAu8; HANDSHAKE_RANDOM_SIZE]);
        server.write_all(&s0_s1).await.unwrap();

        let mut c2 = [0u8; HANDSHAKE_PACKET_SIZE];
        server.read_exact(&mut c2).await.unwrap();
        assert_eq!(&c2[0..4], &s1_time.to_be_bytes());
        assert_eq!(&c2[8..8 + HANDSHAKE_RANDOM_SIZE], &[0xAAu8; HANDSHAKE_RANDOM_SIZE][..]);

        let c1_time = &c1[0..4];
        let c1_random = &c1[8..8 + HANDSHAKE_RANDOM_SIZE];

        let mut s2 = Vec::new();
        s2.extend_from_slice(c1_time);
        s2.extend_from_slice(&[0u8; 4]);
        s2.extend_from_slice(c1_random);
        server.write_all(&s2).await.unwrap();
    }

    #[tokio::test]
    async fn handshake_succeeds_against_well_behaved_peer() {
        let (mut client, server) = duplex(1 << 16);
        let server_task = tokio::spawn(fake_server(server));

        let logger = Logger::new_disabled();
        let result = perform_handshake(
            &mut client,
            StdInstant::now(),
            Duration::from_secs(5),
            &logger,
        )
        .await;

        server_task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn handshake_fails_on_bad_s0_version() {
        let (mut client, mut server) = duplex(1 << 16);

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 1 + HANDSHAKE_PACKET_SIZE];
            server.read_exact(&mut buf).await.unwrap();
            let mut bad = vec![0x06u8];
            bad.extend_from_slice(&[0u8; HANDSHAKE_PACKET_SIZE]);
            server.write_all(&bad).await.unwrap();
        });

        let logger = Logger::new_disabled();
        let result = perform_handshake(
            &mut client,
            StdInstant::now(),
            Duration::from_secs(5),
            &logger,
        )
        .await;

        server_task.await.unwrap();
        assert!(matches!(result, Err(RtmpError::HandshakeFailed(_))));
    }
}
