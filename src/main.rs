use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use roomd::tenant::TenantManager;
use roomd::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Service configuration, read once at startup from ROOMD_* variables.
struct Config {
    bind: String,
    port: u16,
    data_dir: String,
    password: String,
    max_connections: usize,
    compact_threshold: u64,
    metrics_port: Option<u16>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    fn from_env() -> Self {
        Self {
            bind: env_or("ROOMD_BIND", "0.0.0.0"),
            port: env_parse("ROOMD_PORT").unwrap_or(5439),
            data_dir: env_or("ROOMD_DATA_DIR", "./data"),
            password: env_or("ROOMD_PASSWORD", "roomd"),
            max_connections: env_parse("ROOMD_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: env_parse("ROOMD_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: env_parse("ROOMD_METRICS_PORT"),
            tls_cert: std::env::var("ROOMD_TLS_CERT").ok(),
            tls_key: std::env::var("ROOMD_TLS_KEY").ok(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cfg = Config::from_env();
    roomd::observability::init(cfg.metrics_port);

    let tls_acceptor =
        roomd::tls::load_tls_acceptor(cfg.tls_cert.as_deref(), cfg.tls_key.as_deref())?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let tenant_manager = Arc::new(TenantManager::new(
        PathBuf::from(&cfg.data_dir),
        cfg.compact_threshold,
    ));
    let semaphore = Arc::new(Semaphore::new(cfg.max_connections));

    let addr = format!("{}:{}", cfg.bind, cfg.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "roomd serving on {addr} (data {}, tls {}, up to {} connections)",
        cfg.data_dir,
        if tls_acceptor.is_some() { "on" } else { "off" },
        cfg.max_connections,
    );
    if let Some(p) = cfg.metrics_port {
        info!("metrics exported at http://0.0.0.0:{p}/metrics");
    }

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    warn!("connection limit reached, rejecting {peer}");
                    metrics::counter!(roomd::observability::CONNECTIONS_REJECTED_TOTAL)
                        .increment(1);
                    drop(socket);
                    continue;
                };

                info!("connection from {peer}");
                metrics::counter!(roomd::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(roomd::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let pw = cfg.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                        error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(roomd::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    drain(&semaphore, cfg.max_connections).await;
    info!("roomd stopped");
    Ok(())
}

/// Wait for in-flight connections to finish, bounded by DRAIN_TIMEOUT.
async fn drain(semaphore: &Semaphore, max_connections: usize) {
    info!("draining connections...");
    let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            return;
        }
        tokio::select! {
            _ = &mut deadline => {
                let remaining = max_connections - semaphore.available_permits();
                warn!("drain timeout, {remaining} connections still open");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}
