//! Message framing.
//!
//! Every message is `u32 header length | JSON header | u32 body length |
//! body`, lengths big-endian.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Upper bound for either part of a message.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// Bytes a message occupies on the wire.
pub fn encoded_len(header_len: usize, body_len: usize) -> usize {
    8 + header_len + body_len
}

/// Write a message whose header is already serialized.
pub async fn write_frame<W>(writer: &mut W, header: &[u8], body: &[u8]) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    for len in [header.len(), body.len()] {
        if len > MAX_MESSAGE_LEN {
            return Err(Error::MessageTooLarge(len));
        }
    }
    writer.write_u32(header.len() as u32).await?;
    writer.write_all(header).await?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(encoded_len(header.len(), body.len()))
}

pub async fn write_message<W, H>(writer: &mut W, header: &H, body: &[u8]) -> Result<usize>
where
    W: AsyncWrite + Unpin,
    H: Serialize,
{
    let header = serde_json::to_vec(header)?;
    write_frame(writer, &header, body).await
}

/// Read one message. Returns `None` when the peer closed the stream cleanly
/// between messages.
pub async fn read_message<R, H>(reader: &mut R) -> Result<Option<(H, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
    H: DeserializeOwned,
{
    let header_len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let header = read_part(reader, header_len).await?;
    let header: H = serde_json::from_slice(&header)?;

    let body_len = reader.read_u32().await? as usize;
    let body = read_part(reader, body_len).await?;
    Ok(Some((header, body)))
}

async fn read_part<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    if len > MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::{Call, FrameHeader, RequestHeader};

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let header = RequestHeader {
            id: 1,
            call: Call::SubmitFrame(FrameHeader {
                metadata: "{}".into(),
                sent_timestamp: "t".into(),
            }),
        };
        let written = write_message(&mut a, &header, b"jpeg").await.unwrap();
        drop(a);

        let (read, body): (RequestHeader, Vec<u8>) = read_message(&mut b).await.unwrap().unwrap();
        assert_eq!(read, header);
        assert_eq!(body, b"jpeg");
        assert_eq!(written, encoded_len(serde_json::to_vec(&header).unwrap().len(), 4));

        let next: Option<(RequestHeader, Vec<u8>)> = read_message(&mut b).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_MESSAGE_LEN + 1) as u32).await.unwrap();
        let res: Result<Option<(RequestHeader, Vec<u8>)>> = read_message(&mut b).await;
        assert!(matches!(res, Err(Error::MessageTooLarge(_))));
    }
}
