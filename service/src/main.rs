//! `cmdgate-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): load configuration, open the clock store
//!   and trace file, accept socket connections, exit on signal or after the
//!   configured idle timeout.
//! - **`--ping`**: connect to the running gateway, send a hello handshake,
//!   verify the response, then exit.

use std::io::{BufRead, Write};
use std::os::unix::io::FromRawFd;
use std::path::Path;
use std::sync::Arc;

use cmdgate_core::{ConfigLoader, Dispatcher, GatewayConfig};
use cmdgate_service::ipc::{self, ServiceState};
use tokio::net::UnixListener;

/// Poll interval for the idle timer.
const IDLE_POLL_INTERVAL_SECS: u64 = 5;

fn ping(socket_path: &Path) -> std::io::Result<()> {
    let mut stream = std::os::unix::net::UnixStream::connect(socket_path).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", socket_path.display()))
    })?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = format!(
        r#"{{"id":0,"method":"hello","params":{{"protocol_version":"{}","client_version":"ping"}}}}"#,
        cmdgate_service::PROTOCOL_VERSION,
    );
    stream.write_all(hello.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;
    if resp.get("result").is_some() {
        eprintln!("ping: gateway is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown error");
        Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
    }
}

/// Create a Unix listener, preferring systemd socket activation.
///
/// If `LISTEN_FDS` is set to >= 1, uses fd 3 (the first passed fd).
/// Otherwise, binds at the configured socket path.
fn create_listener(socket_path: &Path) -> std::io::Result<UnixListener> {
    if let Ok(val) = std::env::var("LISTEN_FDS")
        && let Ok(n) = val.parse::<u32>()
        && n >= 1
    {
        tracing::info!("Socket activation: using fd 3 from LISTEN_FDS={n}");
        // SAFETY: fd 3 is guaranteed by the systemd socket activation protocol
        let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(3) };
        std_listener.set_nonblocking(true)?;
        return UnixListener::from_std(std_listener);
    }
    ipc::bind(socket_path)
}

fn load_config() -> std::io::Result<GatewayConfig> {
    ConfigLoader::new()
        .load()
        .map_err(|e| std::io::Error::other(format!("Failed to load config: {e}")))
}

fn main() -> std::io::Result<()> {
    let config = load_config()?;
    let socket_path = cmdgate_service::socket_path(&config);

    if std::env::args().nth(1).as_deref() == Some("--ping") {
        return ping(&socket_path);
    }

    run_service(config, &socket_path)
}

#[tokio::main]
async fn run_service(config: GatewayConfig, socket_path: &Path) -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("cmdgate-service v{} starting", env!("CARGO_PKG_VERSION"));

    let (dispatcher, notifier) = Dispatcher::from_config(&config)
        .map_err(|e| std::io::Error::other(format!("Failed to open trace file: {e}")))?;
    tracing::info!(
        store = %config.store_path().display(),
        trace = %config.trace_path().display(),
        "Gateway state opened"
    );

    // No UI is attached to the daemon; surface its notifications in the log.
    let mut notifications = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            tracing::info!(?notification, "UI notification");
        }
    });

    let state = Arc::new(
        ServiceState::new(Arc::new(dispatcher)).with_sync_call_timeout(config.sync_call_timeout()),
    );
    let listener = create_listener(socket_path)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        let _ = shutdown_tx_signal.send(true);
    });

    if let Some(idle_timeout) = config.idle_timeout() {
        let state_idle = Arc::clone(&state);
        tokio::spawn(async move {
            let poll_interval = tokio::time::Duration::from_secs(IDLE_POLL_INTERVAL_SECS);
            loop {
                tokio::time::sleep(poll_interval).await;
                if state_idle.connection_count() == 0 && state_idle.idle_for() >= idle_timeout {
                    tracing::info!(
                        "Idle timeout ({}s): no connections. Exiting.",
                        idle_timeout.as_secs()
                    );
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
        });
    }

    ipc::serve(state, listener, shutdown_rx).await?;

    if socket_path.exists() {
        let _ = std::fs::remove_file(socket_path);
    }
    tracing::info!("cmdgate-service exiting cleanly");
    Ok(())
}
