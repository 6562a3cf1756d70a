//! Length-prefixed framed protocol: `u16` big-endian length || `u8` packet
//! type || JSON payload. Every channel is single-request/single-response.

use crate::error::{Error, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Packet type codes. Wire-visible; must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    CreateLoop = 0,
    CloseLoop = 1,
    AddRule = 2,
    RequestRouteId = 3,
    ConfirmLoop = 4,
    LoopClosed = 5,
    RespFailure = 6,
    RespSuccess = 7,
}

const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Writes one frame: `packet_type` with a JSON-encoded `payload`.
pub async fn write_frame<W, T>(w: &mut W, packet_type: PacketType, payload: &T) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(payload)?;
    let len = body
        .len()
        .checked_add(1)
        .filter(|l| *l <= MAX_FRAME_LEN)
        .ok_or_else(|| Error::protocol("payload too large to frame"))?;
    let mut buf = Vec::with_capacity(2 + 1 + body.len());
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.push(packet_type as u8);
    buf.extend_from_slice(&body);
    w.write_all(&buf).await.map_err(Error::from)?;
    w.flush().await.map_err(Error::from)?;
    Ok(())
}

/// Reads one frame and returns the raw packet-type byte and its JSON body.
///
/// Deliberately does NOT map the type byte into [`PacketType`] here:
/// an unknown code must still decode successfully so the dispatcher can
/// reject it at the application layer with a policy error, rather than
/// failing the frame read itself.
pub async fn read_frame<R>(r: &mut R) -> Result<(u8, Vec<u8>)>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::transport(format!("reading frame length: {e}")))?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::protocol("zero-length frame"));
    }
    let mut rest = vec![0u8; len];
    r.read_exact(&mut rest)
        .await
        .map_err(|e| Error::transport(format!("reading frame body: {e}")))?;
    let packet_type = rest[0];
    let payload = rest.split_off(1);
    Ok((packet_type, payload))
}

pub fn decode_payload<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_known_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, PacketType::RespSuccess, &serde_json::json!(null))
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let (code, payload) = read_frame(&mut cursor).await.unwrap();
        assert_eq!(code, PacketType::RespSuccess as u8);
        let value: serde_json::Value = decode_payload(&payload).unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn decodes_unknown_packet_code_without_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u16.to_be_bytes());
        buf.push(99);
        buf.extend_from_slice(b"{}");
        let mut cursor = std::io::Cursor::new(buf);
        let (code, payload) = read_frame(&mut cursor).await.unwrap();
        assert_eq!(code, 99);
        assert_eq!(payload, b"{}");
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let buf = vec![0u8, 5, 7]; // claims 5 bytes, only 1 present
        let mut cursor = std::io::Cursor::new(buf);
        let res = read_frame(&mut cursor).await;
        assert!(res.is_err());
    }
}
