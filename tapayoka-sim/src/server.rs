//! WebSocket server: one session per app connection

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use tapayoka_proto::ws::Envelope;

use crate::{Device, SimError};

pub struct Server {
    listener: TcpListener,
    device: Arc<Device>,
}

impl Server {
    pub async fn bind(addr: &str, device: Arc<Device>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, device })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Endpoint URL apps connect to
    pub fn url(&self) -> std::io::Result<String> {
        Ok(format!("ws://{}", self.local_addr()?))
    }

    /// Bind to an ephemeral local port and serve in the background
    pub async fn spawn_local(device: Arc<Device>) -> std::io::Result<String> {
        let server = Self::bind("127.0.0.1:0", device).await?;
        let url = server.url()?;
        tokio::spawn(server.run());
        Ok(url)
    }

    pub async fn run(self) -> std::io::Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            wallet = self.device.wallet_address(),
            "simulated device listening"
        );
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let device = self.device.clone();

            tokio::spawn(async move {
                tracing::info!(%addr, "connection");
                if let Err(e) = handle_connection(stream, device).await {
                    tracing::warn!(%addr, "session error: {e}");
                }
                tracing::info!(%addr, "connection closed");
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, device: Arc<Device>) -> Result<(), SimError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    device.connection_accepted();
    let (mut sink, mut stream) = ws.split();

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: Envelope = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("ignoring malformed request: {e}");
                continue;
            }
        };
        tracing::debug!(kind = request.kind(), "request");

        let behavior = device.behavior();
        if behavior.silent {
            continue;
        }
        if behavior.noise {
            for frame in device.noise(&request) {
                sink.send(Message::text(frame)).await?;
            }
        }
        if let Some(reply) = device.handle(&request) {
            sink.send(Message::text(serde_json::to_string(&reply)?)).await?;
            if behavior.close_after_reply {
                sink.close().await?;
                break;
            }
        }
    }

    Ok(())
}
