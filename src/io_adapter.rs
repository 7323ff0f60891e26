// Byte I/O adapter: the only place that touches the raw socket

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RtmpError};

/// Reads exactly `n` bytes or fails with `TransportError`
pub async fn read_exact<R: AsyncRead + Unpin>(stream: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(RtmpError::TransportError)?;
    Ok(buf)
}

/// Writes all of `bytes` or fails with `TransportError`
pub async fn write_all<W: AsyncWrite + Unpin>(stream: &mut W, bytes: &[u8]) -> Result<()> {
    stream
        .write_all(bytes)
        .await
        .map_err(RtmpError::TransportError)?;
    Ok(())
}
