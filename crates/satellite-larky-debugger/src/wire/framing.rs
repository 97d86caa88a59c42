//! `[varint length][payload]` framing used on the debug server socket.
//!
//! The size prefix is the protobuf base-128 varint: seven bits per byte, least
//! significant group first, high bit set while more bytes follow, at most ten
//! bytes.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::{LarkyDebuggerError, Result};

pub const MAX_VARINT_LEN: usize = 10;

/// Upper bound on a single frame payload; larger prefixes are rejected before
/// allocating.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decode a varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when `buf`
/// ends before the varint does.
pub fn decode_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        if let Some(done) = accumulate(&mut value, i, byte)? {
            return Ok(Some((done, i + 1)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(LarkyDebuggerError::DataSizeOverflow);
    }
    Ok(None)
}

/// Fold byte `i` of a varint into `value`; returns the final value once the
/// terminating byte is seen.
fn accumulate(value: &mut u64, i: usize, byte: u8) -> Result<Option<u64>> {
    if byte < 0x80 {
        // The 10th byte only has room for the 64th bit.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(LarkyDebuggerError::DataSizeOverflow);
        }
        return Ok(Some(*value | (u64::from(byte) << (7 * i))));
    }
    *value |= u64::from(byte & 0x7f) << (7 * i);
    Ok(None)
}

/// Read a varint from `reader`.
///
/// `Ok(None)` means the stream ended before the varint was complete.
pub async fn read_varint<R>(reader: &mut R) -> Result<Option<u64>>
where
    R: AsyncRead + Unpin,
{
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if let Some(done) = accumulate(&mut value, i, byte)? {
            return Ok(Some(done));
        }
    }
    Err(LarkyDebuggerError::DataSizeOverflow)
}

/// Read one frame payload.
///
/// Returns `Ok(None)` at end of stream: either the peer closed the socket
/// (possibly mid-frame) or it sent a zero-length frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let Some(len) = read_varint(reader).await? else {
        return Ok(None);
    };
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_BYTES as u64 {
        return Err(LarkyDebuggerError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(Some(payload)),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + MAX_VARINT_LEN);
    encode_varint(payload.len() as u64, &mut out);
    out.extend_from_slice(payload);
    out
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn encoded(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_varint(value, &mut buf);
        buf
    }

    #[test]
    fn encodes_known_values() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xac, 0x02]);
        assert_eq!(encoded(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn decodes_u64_max() {
        let buf = encoded(u64::MAX);
        assert_eq!(decode_varint(&buf).unwrap(), Some((u64::MAX, MAX_VARINT_LEN)));
    }

    #[test]
    fn tenth_byte_above_one_overflows() {
        let mut buf = vec![0xff; 9];
        buf.push(0x02);
        assert!(matches!(
            decode_varint(&buf),
            Err(LarkyDebuggerError::DataSizeOverflow)
        ));
    }

    #[test]
    fn tenth_byte_with_continuation_overflows() {
        let buf = vec![0x80; 11];
        assert!(matches!(
            decode_varint(&buf),
            Err(LarkyDebuggerError::DataSizeOverflow)
        ));
    }

    #[test]
    fn incomplete_varint_needs_more_bytes() {
        assert_eq!(decode_varint(&[0x80, 0x80]).unwrap(), None);
        assert_eq!(decode_varint(&[]).unwrap(), None);
    }

    #[tokio::test]
    async fn reads_frames_back_to_back() {
        let mut bytes = encode_frame(b"hello");
        bytes.extend(encode_frame(&[7u8; 300]));
        let mut reader = bytes.as_slice();

        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(vec![7u8; 300]));
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn overflowing_prefix_fails_async_read() {
        let mut bytes = vec![0xff; 9];
        bytes.push(0x7f);
        let mut reader = bytes.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(LarkyDebuggerError::DataSizeOverflow)
        ));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_end_of_stream() {
        let bytes = encode_frame(b"truncated");
        let mut reader = &bytes[..bytes.len() - 3];
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_length_frame_is_end_of_stream() {
        let mut reader: &[u8] = &[0x00, 0x01, 0x02];
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected_before_allocation() {
        let mut bytes = Vec::new();
        encode_varint(MAX_FRAME_BYTES as u64 + 1, &mut bytes);
        let mut reader = bytes.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(LarkyDebuggerError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn short_reads_accumulate_until_the_frame_is_complete() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = encode_frame(&[42u8; 200]);

        let writer = tokio::spawn(async move {
            for chunk in frame.chunks(7) {
                server.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        assert_eq!(read_frame(&mut client).await.unwrap(), Some(vec![42u8; 200]));
        writer.await.unwrap();
    }
}
