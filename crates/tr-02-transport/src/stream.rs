//! TCP stream transport: dial and handshake halves.

use crate::errors::TransportError;
use crate::framing::{read_frame, write_frame};
use crate::hello::{gate_hello, LocalHello, RemoteHello};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Dial a peer's published listening address.
pub(crate) async fn dial(
    addr: &str,
    connect_timeout: Duration,
) -> Result<TcpStream, TransportError> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            Err(TransportError::Refused(addr.to_string()))
        }
        Ok(Err(e)) => Err(TransportError::Unreachable(format!("{addr}: {e}"))),
        Err(_) => Err(TransportError::Timeout(addr.to_string())),
    }
}

/// Outbound handshake: we speak first, then gate the reply.
pub(crate) async fn outbound_handshake(
    stream: &mut TcpStream,
    local: &LocalHello,
    handshake_timeout: Duration,
) -> Result<RemoteHello, TransportError> {
    write_frame(stream, &local.to_frame()).await?;
    let frame = timeout(handshake_timeout, read_frame(stream))
        .await
        .map_err(|_| TransportError::Timeout("hello exchange".into()))??
        .ok_or_else(|| TransportError::HandshakeFailed("peer closed during hello".into()))?;
    gate_hello(local, frame)
}

/// Inbound handshake: the dialer speaks first; we gate, then answer.
///
/// A version-gated peer gets told why before the close, so its dial
/// error is precise rather than a bare EOF.
pub(crate) async fn inbound_handshake(
    stream: &mut TcpStream,
    local: &LocalHello,
    handshake_timeout: Duration,
) -> Result<RemoteHello, TransportError> {
    let frame = timeout(handshake_timeout, read_frame(stream))
        .await
        .map_err(|_| TransportError::Timeout("hello exchange".into()))??
        .ok_or_else(|| TransportError::HandshakeFailed("peer closed during hello".into()))?;
    match gate_hello(local, frame) {
        Ok(remote) => {
            write_frame(stream, &local.to_frame()).await?;
            Ok(remote)
        }
        Err(TransportError::VersionIncompatible {
            local: ours,
            remote: theirs,
        }) => {
            let notice = shared_types::Frame::VersionMismatch {
                client_version: theirs.clone(),
                server_version: ours.clone(),
                client_build_id: String::new(),
                server_build_id: local.build_id.clone(),
                message: "protocol version gate failed".into(),
            };
            let _ = write_frame(stream, &notice).await;
            Err(TransportError::VersionIncompatible {
                local: ours,
                remote: theirs,
            })
        }
        Err(e) => Err(e),
    }
}
