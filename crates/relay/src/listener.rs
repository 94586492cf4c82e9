//! Lifecycle supervisor for the relay.
//!
//! Four concurrent activities run under one listener: the TCP and UDP
//! protocol servers, the tunnel reader, and the correlator. Each sends
//! exactly one termination event when it stops accepting work. The first
//! event triggers an idempotent shutdown of everything else; serving ends
//! once all four events are in, reporting the first error observed.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warren_dns_domain::{ListenerConfig, RelayError};

use crate::dns::cache::AnswerCache;
use crate::dns::handler::TunnelQueryHandler;
use crate::dns::server;
use crate::tunnel::{run_correlator, run_reader, PendingRequest, RemoteResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    TcpServer,
    UdpServer,
    Reader,
    Correlator,
}

/// The one message each activity sends when it stops accepting work.
#[derive(Debug)]
pub(crate) struct Termination {
    pub activity: Activity,
    pub error: Option<RelayError>,
}

/// Depth of the hand-off queue between query handlers and the correlator.
const REQUEST_QUEUE: usize = 32;

/// Number of concurrent activities a listener runs.
const ACTIVITIES: usize = 4;

struct Shared {
    active: Mutex<bool>,
    server_cancel: CancellationToken,
    tunnel_cancel: CancellationToken,
}

impl Shared {
    /// Idempotent teardown. The first caller cancels both protocol
    /// servers and the tunnel token; the tunnel token doubles as the
    /// correlator's interrupt and the reader's stop signal, and dropping
    /// their halves closes the connection. Later callers are no-ops.
    fn shutdown(&self) {
        let mut active = self.active.lock();
        if !*active {
            return;
        }
        *active = false;
        self.server_cancel.cancel();
        self.tunnel_cancel.cancel();
        debug!("listener shutdown initiated");
    }
}

/// Cloneable handle for shutting a serving listener down from outside.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Safe to call concurrently and repeatedly; the close side effects
    /// happen exactly once.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

pub struct DnsTunnelListener<T> {
    tunnel: T,
    domain: Arc<str>,
    config: ListenerConfig,
    cache: Arc<AnswerCache>,
    shared: Arc<Shared>,
}

impl<T> DnsTunnelListener<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// `tunnel` is the established connection to the resolving peer;
    /// `domain` is the delegated suffix (a trailing dot is accepted and
    /// ignored).
    pub fn new(tunnel: T, domain: &str, config: ListenerConfig) -> Self {
        let domain = domain.strip_suffix('.').unwrap_or(domain);
        Self {
            tunnel,
            domain: Arc::from(domain),
            config,
            cache: Arc::new(AnswerCache::new()),
            shared: Arc::new(Shared {
                active: Mutex::new(true),
                server_cancel: CancellationToken::new(),
                tunnel_cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: self.shared.clone(),
        }
    }

    /// Serves DNS for the delegated domain until the tunnel or either
    /// protocol server terminates, then shuts everything down and returns
    /// the first error observed (`Ok` when every activity closed
    /// cleanly).
    pub async fn serve(self) -> Result<(), RelayError> {
        let ip: IpAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid bind address: {e}")))?;
        let bind_addr = SocketAddr::new(ip, self.config.dns_port);

        let (request_tx, request_rx) = mpsc::channel::<PendingRequest>(REQUEST_QUEUE);
        let (delivery_tx, delivery_rx) = mpsc::channel::<Vec<String>>(1);
        let (termination_tx, mut termination_rx) = mpsc::channel::<Termination>(ACTIVITIES);

        let handler = TunnelQueryHandler::new(
            self.domain.clone(),
            self.cache.clone(),
            RemoteResolver::new(request_tx),
        );

        let (read_half, write_half) = tokio::io::split(self.tunnel);

        tokio::spawn(server::run_tcp_server(
            bind_addr,
            handler.clone(),
            self.shared.server_cancel.clone(),
            termination_tx.clone(),
        ));
        tokio::spawn(server::run_udp_server(
            bind_addr,
            self.config.udp_payload_size,
            handler,
            self.shared.server_cancel.clone(),
            termination_tx.clone(),
        ));
        tokio::spawn(run_reader(
            read_half,
            delivery_tx,
            self.shared.tunnel_cancel.clone(),
            termination_tx.clone(),
        ));
        tokio::spawn(run_correlator(
            write_half,
            request_rx,
            delivery_rx,
            self.shared.tunnel_cancel.clone(),
            termination_tx,
        ));

        info!(domain = %self.domain, bind_address = %bind_addr, "DNS tunnel listener serving");

        let mut first_error = None;
        let mut open = ACTIVITIES;
        while open > 0 {
            let Some(termination) = termination_rx.recv().await else {
                break;
            };
            open -= 1;
            debug!(
                activity = ?termination.activity,
                error = ?termination.error,
                remaining = open,
                "activity closed"
            );

            // Any termination forces the rest down; the tunnel token this
            // cancels is also the correlator interrupt the reader's death
            // requires.
            self.shared.shutdown();

            if let Some(error) = termination.error {
                if first_error.is_none() {
                    first_error = Some(error);
                } else {
                    debug!(error = %error, "discarding late error");
                }
            }
        }

        info!(domain = %self.domain, "DNS tunnel listener stopped");
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Serves DNS for `domain` over `tunnel` with the default bind
/// configuration. Blocks until the tunnel or either protocol server
/// terminates and returns the first observed error.
pub async fn serve_dns<T>(tunnel: T, domain: &str) -> Result<(), RelayError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    DnsTunnelListener::new(tunnel, domain, ListenerConfig::default())
        .serve()
        .await
}
