//! Datagram Transport Boundary
//!
//! Serializes the `{result, type, data}` envelope onto a UDP socket and reads
//! it back. Exchanges are fire-and-forget except for the synchronous
//! request/response steps, where the sender blocks on a single reply datagram
//! with no timeout. The bulk-load forwarding path is the one place that
//! retries: a successor that stays unreachable there aborts the load.

use crate::protocol::Envelope;
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

pub const MAX_DATAGRAM: usize = 65536;

const BULK_SEND_ATTEMPTS: usize = 5;
const BULK_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Send one envelope datagram.
pub async fn send<M: Serialize>(
    socket: &UdpSocket,
    addr: SocketAddr,
    envelope: &Envelope<M>,
) -> Result<()> {
    let bytes = serde_json::to_vec(envelope)?;
    socket
        .send_to(&bytes, addr)
        .await
        .with_context(|| format!("failed to send datagram to {}", addr))?;
    Ok(())
}

/// Receive and decode one envelope datagram.
pub async fn recv<R: DeserializeOwned>(socket: &UdpSocket) -> Result<(Envelope<R>, SocketAddr)> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (len, src) = socket
        .recv_from(&mut buf)
        .await
        .context("failed to receive datagram")?;
    let envelope = serde_json::from_slice(&buf[..len])
        .with_context(|| format!("malformed datagram from {}", src))?;
    Ok((envelope, src))
}

/// Send an envelope and block until a single reply datagram arrives.
pub async fn request<M: Serialize, R: DeserializeOwned>(
    socket: &UdpSocket,
    addr: SocketAddr,
    envelope: &Envelope<M>,
) -> Result<Envelope<R>> {
    send(socket, addr, envelope).await?;
    let (reply, _) = recv(socket).await?;
    Ok(reply)
}

/// Bulk-load forwarding only: retry a bounded number of times, then give up
/// with a fatal error.
pub async fn send_with_retry<M: Serialize>(
    socket: &UdpSocket,
    addr: SocketAddr,
    envelope: &Envelope<M>,
) -> Result<()> {
    let bytes = serde_json::to_vec(envelope)?;
    let mut attempt = 1;
    loop {
        match socket.send_to(&bytes, addr).await {
            Ok(_) => return Ok(()),
            Err(error) if attempt < BULK_SEND_ATTEMPTS => {
                tracing::warn!(
                    "send to {} failed (attempt {}/{}): {}",
                    addr,
                    attempt,
                    BULK_SEND_ATTEMPTS,
                    error
                );
                attempt += 1;
                tokio::time::sleep(BULK_RETRY_DELAY).await;
            }
            Err(error) => {
                return Err(error).with_context(|| {
                    format!(
                        "giving up on {} after {} attempts",
                        addr, BULK_SEND_ATTEMPTS
                    )
                });
            }
        }
    }
}
