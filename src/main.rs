//! sni-gateway: gateway entry point and supervisor
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! sudo ./sni-gateway
//!
//! # Run with an explicit configuration file
//! sudo ./sni-gateway -c /etc/sni-gateway/config.json
//!
//! # Validate a configuration and exit
//! ./sni-gateway -c config.json --check
//! ```
//!
//! The supervisor owns the shutdown channel: SIGINT/SIGTERM stop the accept
//! loops and the sweepers, in-flight handlers finish, and every task is
//! joined before the process exits. Port 53 and the DoT certificate are
//! best-effort (their absence disables one front-end with a warning); a
//! failed DoH bind, or a failed DoT bind with certificate material present,
//! aborts startup.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use sni_gateway::access::AccessTable;
use sni_gateway::config::{save_config, Config, ConfigStore};
use sni_gateway::dns::{
    DohServer, DohUpstreams, DotServer, ResponseCache, Resolver, TcpDnsServer, UdpDnsServer,
};
use sni_gateway::error::StartupError;
use sni_gateway::limit::{GlobalRateLimiter, IpRateLimiters};
use sni_gateway::metrics::GatewayMetrics;
use sni_gateway::sni::SniProxy;

/// Loopback address the plaintext DoH server binds
const DOH_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Interval between expired-user sweeps
const USER_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate a default configuration and exit
    generate_config: bool,
    /// Validate the configuration and exit
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/sni-gateway/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("sni-gateway v{}", sni_gateway::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"sni-gateway v{}

Multi-protocol DNS gateway (Do53/DoT/DoH) with a transparent TLS SNI relay.

USAGE:
    sni-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/sni-gateway/config.json]
    -g, --generate-config   Write a default configuration and exit
    --check                 Validate the configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    RUST_LOG        Override the log filter (takes precedence over the config)
    DOH_UPSTREAM    Replace the first upstream DoH URL at startup

LISTENERS:
    53/udp, 53/tcp  Plain DNS (when dns_enabled; best-effort bind)
    443/tcp         SNI relay (port configurable via sni_port)
    853/tcp         DNS over TLS (disabled when no certificate is present)
    127.0.0.1:8080  DNS over HTTPS behind an external TLS terminator

TLS MATERIAL:
    /etc/letsencrypt/live/<host>/fullchain.pem and privkey.pem
"#,
        sni_gateway::VERSION
    );
}

/// Initialize structured JSON logging.
///
/// `RUST_LOG` takes precedence; otherwise the config's `log_level` applies,
/// with dependency noise capped at warn.
fn init_logging(config: &Config) {
    let level = match config.log_level.as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("valid directive"))
        .add_directive("h2=warn".parse().expect("valid directive"))
        .add_directive("rustls=warn".parse().expect("valid directive"))
        .add_directive("tokio=warn".parse().expect("valid directive"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        save_config(&args.config_path, &Config::default_config())
            .with_context(|| format!("failed to write {:?}", args.config_path))?;
        println!("Wrote default configuration to {:?}", args.config_path);
        return Ok(());
    }

    let store = Arc::new(
        ConfigStore::open(&args.config_path)
            .with_context(|| format!("failed to load configuration {:?}", args.config_path))?,
    );

    if args.check_config {
        println!("Configuration OK: {:?}", args.config_path);
        return Ok(());
    }

    let cfg = store.current();
    init_logging(&cfg);
    info!(version = sni_gateway::VERSION, "sni-gateway starting");

    if let Ok(url) = std::env::var("DOH_UPSTREAM") {
        if !url.is_empty() {
            store.override_primary_upstream(url);
        }
    }

    sni_gateway::tls::init_crypto();

    // Shared state
    let metrics = Arc::new(GatewayMetrics::new());
    let access = Arc::new(AccessTable::new());
    let global_limit = Arc::new(GlobalRateLimiter::new());
    let ip_limits = Arc::new(IpRateLimiters::new());
    let cache = Arc::new(ResponseCache::new(Arc::clone(&metrics)));
    let resolver = Arc::new(Resolver::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        DohUpstreams::new(),
        Arc::clone(&metrics),
    ));

    info!(
        host = %cfg.host,
        domains = cfg.domains.len(),
        cache_ttl = cfg.cache_ttl,
        upstreams = cfg.upstream_doh.len(),
        auth_enabled = cfg.enable_auth,
        user_management = cfg.user_management,
        metrics_enabled = cfg.metrics_enabled,
        "configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // DoH: mandatory loopback listener
    {
        let listener = TcpListener::bind(DOH_LISTEN_ADDR)
            .await
            .map_err(|e| StartupError::bind(format!("DoH {DOH_LISTEN_ADDR}"), e))?;
        let server = Arc::new(DohServer::new(
            Arc::clone(&resolver),
            Arc::clone(&store),
            Arc::clone(&access),
            Arc::clone(&global_limit),
            Arc::clone(&ip_limits),
            Arc::clone(&metrics),
        ));
        tasks.push(tokio::spawn(server.run(listener, shutdown_tx.subscribe())));
    }

    // DoT: disabled without certificate material, fatal on bind failure
    match sni_gateway::tls::server_config_for_host(&cfg.host) {
        Ok(tls_config) => {
            let listener = TcpListener::bind(("0.0.0.0", 853))
                .await
                .map_err(|e| StartupError::bind("DoT :853", e))?;
            let acceptor = TlsAcceptor::from(tls_config);
            let server = DotServer::new(
                Arc::clone(&resolver),
                Arc::clone(&store),
                Arc::clone(&access),
                Arc::clone(&global_limit),
                Arc::clone(&metrics),
            );
            tasks.push(tokio::spawn(server.run(
                listener,
                acceptor,
                shutdown_tx.subscribe(),
            )));
        }
        Err(e) => {
            warn!(error = %e, host = %cfg.host, "DoT certificate not available, DoT server disabled");
            warn!("to enable DoT, obtain a certificate for the configured host");
        }
    }

    // SNI relay: disabled on port conflict
    {
        let sni_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cfg.sni_port));
        match TcpListener::bind(sni_addr).await {
            Ok(listener) => {
                let proxy = Arc::new(SniProxy::new(Arc::clone(&store), Arc::clone(&metrics)));
                tasks.push(tokio::spawn(proxy.run(listener, shutdown_tx.subscribe())));
            }
            Err(e) => {
                error!(error = %e, port = cfg.sni_port, "SNI relay failed to listen");
                warn!("SNI relay disabled due to port conflict");
            }
        }
    }

    // Plain DNS: best-effort bind on port 53
    if cfg.dns_enabled {
        match UdpSocket::bind(("0.0.0.0", 53)).await {
            Ok(socket) => {
                let server = UdpDnsServer::new(Arc::clone(&resolver));
                tasks.push(tokio::spawn(server.run(socket, shutdown_tx.subscribe())));
            }
            Err(e) => {
                error!(error = %e, "failed to listen on UDP :53");
                warn!("standard DNS server disabled (port 53 unavailable)");
            }
        }
        match TcpListener::bind(("0.0.0.0", 53)).await {
            Ok(listener) => {
                let server = TcpDnsServer::new(Arc::clone(&resolver));
                tasks.push(tokio::spawn(server.run(listener, shutdown_tx.subscribe())));
            }
            Err(e) => {
                error!(error = %e, "failed to listen on TCP :53");
            }
        }
    }

    // Sweepers
    tasks.push(tokio::spawn(
        Arc::clone(&cache).run_sweeper(shutdown_tx.subscribe()),
    ));
    if cfg.user_management {
        tasks.push(tokio::spawn(run_user_sweeper(
            Arc::clone(&access),
            shutdown_tx.subscribe(),
        )));
        info!("user expiration checker started");
    }

    info!(
        dns_enabled = cfg.dns_enabled,
        sni_port = cfg.sni_port,
        dot_port = 853,
        doh_address = DOH_LISTEN_ADDR,
        "all servers started"
    );

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received, stopping servers...");

    let _ = shutdown_tx.send(());

    for task in tasks {
        let _ = task.await;
    }

    info!("shutdown complete");
    Ok(())
}

/// Hourly expired-user sweep, stopped by the shutdown channel
async fn run_user_sweeper(access: Arc<AccessTable>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(USER_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                access.sweep_expired();
            }
            _ = shutdown.recv() => return,
        }
    }
}

/// Block until SIGINT or SIGTERM arrives
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for SIGINT")?;
        }
        _ = sigterm.recv() => {}
    }
    Ok(())
}
