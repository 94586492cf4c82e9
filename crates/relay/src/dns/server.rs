//! Protocol server construction and serve loops.
//!
//! Sockets are built with socket2 so both servers can set reuse and
//! buffer options before handing the descriptors to tokio; the serve
//! loops themselves are hickory-server's, one `ServerFuture` per
//! transport so each reports its own termination.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_server::ServerFuture;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warren_dns_domain::RelayError;

use crate::dns::handler::TunnelQueryHandler;
use crate::listener::{Activity, Termination};

/// Idle timeout for TCP DNS connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Datagrams the kernel may queue per socket, used to size the socket
/// buffers from the configured maximum datagram size.
const UDP_QUEUE_DEPTH: usize = 128;

pub(crate) async fn run_tcp_server(
    addr: SocketAddr,
    handler: TunnelQueryHandler,
    shutdown: CancellationToken,
    terminations: mpsc::Sender<Termination>,
) {
    let error = serve_tcp(addr, handler, shutdown).await.err();
    debug!("TCP DNS server closed");
    let _ = terminations
        .send(Termination {
            activity: Activity::TcpServer,
            error,
        })
        .await;
}

pub(crate) async fn run_udp_server(
    addr: SocketAddr,
    udp_payload_size: u16,
    handler: TunnelQueryHandler,
    shutdown: CancellationToken,
    terminations: mpsc::Sender<Termination>,
) {
    let error = serve_udp(addr, udp_payload_size, handler, shutdown)
        .await
        .err();
    debug!("UDP DNS server closed");
    let _ = terminations
        .send(Termination {
            activity: Activity::UdpServer,
            error,
        })
        .await;
}

async fn serve_tcp(
    addr: SocketAddr,
    handler: TunnelQueryHandler,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let listener = create_tcp_listener(addr).map_err(|e| server_error("TCP", e))?;
    info!(bind_address = %addr, "TCP DNS server listening");

    let mut server = ServerFuture::new(handler);
    server.register_listener(listener, TCP_TIMEOUT);

    tokio::select! {
        result = server.block_until_done() => {
            return result.map_err(|e| server_error("TCP", e));
        }
        _ = shutdown.cancelled() => {}
    }

    if let Err(e) = server.shutdown_gracefully().await {
        debug!(error = %e, "TCP DNS server shutdown error");
    }
    Ok(())
}

async fn serve_udp(
    addr: SocketAddr,
    udp_payload_size: u16,
    handler: TunnelQueryHandler,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let socket = create_udp_socket(addr, udp_payload_size).map_err(|e| server_error("UDP", e))?;
    info!(bind_address = %addr, "UDP DNS server listening");

    let mut server = ServerFuture::new(handler);
    server.register_socket(socket);

    tokio::select! {
        result = server.block_until_done() => {
            return result.map_err(|e| server_error("UDP", e));
        }
        _ = shutdown.cancelled() => {}
    }

    if let Err(e) = server.shutdown_gracefully().await {
        debug!(error = %e, "UDP DNS server shutdown error");
    }
    Ok(())
}

fn server_error(transport: &'static str, error: impl std::fmt::Display) -> RelayError {
    RelayError::Server {
        transport,
        message: error.to_string(),
    }
}

fn create_udp_socket(addr: SocketAddr, udp_payload_size: u16) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let buffer = udp_payload_size as usize * UDP_QUEUE_DEPTH;
    socket.set_recv_buffer_size(buffer)?;
    socket.set_send_buffer_size(buffer)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

fn create_tcp_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
