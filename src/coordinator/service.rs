use super::registry::Registry;
use crate::protocol::{Command, Envelope, Reply};
use crate::transport::{self, MAX_DATAGRAM};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// UDP front end of the registry.
///
/// Receives space-separated text commands, dispatches them against the single
/// owned [`Registry`] state, and answers each with one envelope datagram.
/// Command handling is serialized behind the registry lock, which is all the
/// synchronization the lifecycle flags need.
pub struct CoordinatorService {
    socket: UdpSocket,
    pub registry: Mutex<Registry>,
}

impl CoordinatorService {
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        let port = socket.local_addr()?.port();
        Ok(Arc::new(Self {
            socket,
            registry: Mutex::new(Registry::new(port)),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let line = String::from_utf8_lossy(&buf[..len]);
                    self.handle_line(line.trim(), src).await;
                }
                Err(error) => {
                    tracing::error!("failed to receive command datagram: {}", error);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_line(&self, line: &str, src: SocketAddr) {
        tracing::info!("received `{}` from {}", line, src);

        let reply = match Command::parse(line) {
            Ok(command) => {
                let mut registry = self.registry.lock().await;
                match registry.dispatch(command) {
                    Ok(reply) => {
                        if let Reply::Listing(lines) = &reply {
                            for entry in lines {
                                tracing::info!("{}", entry);
                            }
                        }
                        Envelope::success(reply)
                    }
                    Err(error) => {
                        tracing::warn!("rejected `{}`: {}", line, error);
                        Envelope::failure(Reply::Error(error.to_string()))
                    }
                }
            }
            Err(error) => {
                tracing::warn!("unparseable `{}`: {}", line, error);
                Envelope::failure(Reply::Error(error.to_string()))
            }
        };

        if let Err(error) = transport::send(&self.socket, src, &reply).await {
            tracing::error!("failed to answer {}: {}", src, error);
        }
    }
}
