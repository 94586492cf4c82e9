//! Wire framing for the tunnel connection.
//!
//! Each message is a u32 big-endian payload length followed by a JSON
//! body. The relay writes queried names (JSON strings) and reads address
//! lists (JSON string arrays). A zero-length frame is the peer's explicit
//! close signal; a bare EOF means the stream ended.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use warren_dns_domain::RelayError;

/// Upper bound on a single frame payload. Anything larger is not a frame
/// this protocol produces and aborts the stream.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Writes one length-prefixed JSON frame.
pub async fn send_frame<W, T>(tunnel: &mut W, value: &T) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body =
        serde_json::to_vec(value).map_err(|e| RelayError::MalformedFrame(e.to_string()))?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    tunnel
        .write_all(&frame)
        .await
        .map_err(RelayError::TunnelSend)?;
    tunnel.flush().await.map_err(RelayError::TunnelSend)?;
    Ok(())
}

/// Reads one length-prefixed JSON frame. `Ok(None)` means the stream
/// terminated cleanly, either by EOF before a length prefix or by an
/// explicit zero-length close frame.
pub async fn receive_frame<R, T>(tunnel: &mut R) -> Result<Option<T>, RelayError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match tunnel.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(RelayError::TunnelRecv(e)),
    }

    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_LEN {
        return Err(RelayError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    tunnel
        .read_exact(&mut body)
        .await
        .map_err(RelayError::TunnelRecv)?;
    let value =
        serde_json::from_slice(&body).map_err(|e| RelayError::MalformedFrame(e.to_string()))?;
    Ok(Some(value))
}

/// Sends one suffix-stripped name to the peer for resolution.
pub async fn send_message<W>(tunnel: &mut W, name: &str) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    send_frame(tunnel, name).await
}

/// Receives the next address list from the peer.
pub async fn receive_message<R>(tunnel: &mut R) -> Result<Option<Vec<String>>, RelayError>
where
    R: AsyncRead + Unpin,
{
    receive_frame(tunnel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn name_and_addresses_round_trip() {
        let (mut ours, mut peer) = tokio::io::duplex(1024);

        send_message(&mut ours, "host1").await.unwrap();
        let name: Option<String> = receive_frame(&mut peer).await.unwrap();
        assert_eq!(name.as_deref(), Some("host1"));

        send_frame(&mut peer, &vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()])
            .await
            .unwrap();
        let addresses = receive_message(&mut ours).await.unwrap().unwrap();
        assert_eq!(addresses, vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[tokio::test]
    async fn eof_reads_as_clean_termination() {
        let (ours, mut peer) = tokio::io::duplex(64);
        drop(ours);
        let decoded: Option<Vec<String>> = receive_message(&mut peer).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn zero_length_frame_reads_as_clean_termination() {
        let (mut ours, mut peer) = tokio::io::duplex(64);
        ours.write_all(&0u32.to_be_bytes()).await.unwrap();
        let decoded: Option<Vec<String>> = receive_message(&mut peer).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut ours, mut peer) = tokio::io::duplex(64);
        ours.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes())
            .await
            .unwrap();
        let err = receive_message(&mut peer).await.unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_a_framing_error() {
        let (mut ours, mut peer) = tokio::io::duplex(64);
        ours.write_all(&3u32.to_be_bytes()).await.unwrap();
        ours.write_all(b"%%%").await.unwrap();
        let err = receive_message(&mut peer).await.unwrap_err();
        assert!(matches!(err, RelayError::MalformedFrame(_)));
    }
}
