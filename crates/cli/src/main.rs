use clap::Parser;
use tokio::net::TcpStream;
use tracing::{error, info};
use warren_dns_domain::{CliOverrides, Config};
use warren_dns_relay::DnsTunnelListener;

mod bootstrap;

#[derive(Parser)]
#[command(name = "warren-dns")]
#[command(version)]
#[command(about = "DNS relay that resolves a delegated domain through a point-to-point tunnel")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<String>,

    /// Domain suffix delegated to the tunnel peer
    #[arg(short = 'D', long)]
    domain: Option<String>,

    /// Tunnel peer address (host:port)
    #[arg(short = 't', long)]
    tunnel: Option<String>,

    /// DNS bind address
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// DNS port
    #[arg(short = 'd', long)]
    dns_port: Option<u16>,

    /// Maximum UDP datagram size
    #[arg(long)]
    udp_payload_size: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        bind_address: cli.bind,
        dns_port: cli.dns_port,
        udp_payload_size: cli.udp_payload_size,
        peer_address: cli.tunnel,
        domain: cli.domain,
        log_level: cli.log_level,
    };
    let config = Config::load(cli.config.as_deref(), overrides)?;

    bootstrap::init_logging(&config.logging);
    info!("Starting warren-dns v{}", env!("CARGO_PKG_VERSION"));

    if config.tunnel.domain.is_empty() {
        anyhow::bail!("no delegated domain configured (use --domain or the [tunnel] section)");
    }

    info!(peer = %config.tunnel.peer_address, "connecting to tunnel peer");
    let tunnel = TcpStream::connect(&config.tunnel.peer_address).await?;
    tunnel.set_nodelay(true)?;

    let listener = DnsTunnelListener::new(tunnel, &config.tunnel.domain, config.listener.clone());
    let shutdown = listener.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.shutdown();
        }
    });

    match listener.serve().await {
        Ok(()) => {
            info!("listener closed cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "listener failed");
            Err(e.into())
        }
    }
}
