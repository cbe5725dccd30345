//! TCP link for the follower side.
//!
//! Listens on an `embassy-net` stack and feeds each connection through the
//! line framer, forwarding parsed commands to the session queue in arrival
//! order. A closed or broken connection enqueues a disconnect event so the
//! controller drops its baselines before the next peer arrives; a partial
//! message never survives a reconnect.

use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_time::{with_timeout, Duration};
use embedded_io_async::Read;

use crate::utils::connection::framer::LineFramer;
use crate::utils::controllers::mirror::{SessionEvent, SESSION_CHANNEL};

/// Timeouts applied to the connection read loop.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Upper bound on a single socket read; an idle link just loops again so
    /// nothing ever blocks indefinitely.
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a connection stopped being served.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer shut the stream down.
    PeerClosed,
    /// Transport error reported by the socket.
    Error,
}

/// Serve one already-open byte stream until it closes.
///
/// This is the programmatic entry point: anything implementing
/// [`embedded_io_async::Read`] can drive a session, which is also how the
/// mock host exercises the engine without real hardware.
pub async fn serve_connection<R: Read>(
    reader: &mut R,
    config: ServerConfig,
) -> CloseReason {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 1024];
    let reason = loop {
        let read = match with_timeout(config.read_timeout, reader.read(&mut buf)).await {
            Ok(Ok(0)) => break CloseReason::PeerClosed,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::error!("link read error: {:?}", e);
                break CloseReason::Error;
            }
            // Idle link; keep waiting.
            Err(_) => continue,
        };
        for parsed in framer.feed(&buf[..read]) {
            match parsed {
                Ok(command) => SESSION_CHANNEL.send(SessionEvent::Command(command)).await,
                Err(e) => tracing::error!("dropping malformed message: {:?}", e),
            }
        }
    };
    if !framer.pending().is_empty() {
        tracing::debug!(
            "discarding {} byte(s) of partial message",
            framer.pending().len()
        );
    }
    SESSION_CHANNEL.send(SessionEvent::Disconnected).await;
    reason
}

/// Accept loop for the follower side. Serves one leader connection at a time.
pub async fn run(
    port: u16,
    stack: Stack<'static>,
    config: Option<ServerConfig>,
) -> ! {
    let config = config.unwrap_or_default();

    if let Some(ip_cfg) = stack.config_v4() {
        tracing::info!("listening for leader at {}:{}", ip_cfg.address, port);
    } else {
        tracing::warn!("listening on port {port}, but no IPv4 address is assigned yet!");
    }

    let (mut rx_buffer, mut tx_buffer) = ([0; 1024], [0; 1024]);
    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        if let Err(e) = socket.accept(port).await {
            tracing::error!("accept failed: {:?}", e);
            continue;
        }
        tracing::info!("leader connected from {:?}", socket.remote_endpoint());
        let reason = serve_connection(&mut socket, config).await;
        tracing::info!(?reason, "connection finished");
        socket.close();
    }
}
