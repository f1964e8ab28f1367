//! `cmdgate-service`: transport bindings and the gateway daemon.
//!
//! Every binding wraps what it receives in a [`cmdgate_protocol::RawPayload`],
//! hands it to the shared [`cmdgate_core::Dispatcher`] on the blocking pool,
//! and delivers the encoded reply over its own channel. The daemon listens
//! on a Unix domain socket at `$XDG_RUNTIME_DIR/cmdgate.sock` and speaks
//! newline-delimited JSON.

pub mod bindings;
pub mod bus;
pub mod ipc;
pub mod protocol;

use std::path::PathBuf;

use cmdgate_core::GatewayConfig;

/// Protocol version for the socket handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "cmdgate.sock";

/// Default socket path using XDG_RUNTIME_DIR.
///
/// Falls back to `/tmp/cmdgate-<username>.sock` if XDG_RUNTIME_DIR is not set.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        PathBuf::from(format!("/tmp/cmdgate-{user}.sock"))
    }
}

/// Configured socket path, or the default.
pub fn socket_path(config: &GatewayConfig) -> PathBuf {
    config
        .socket_path
        .clone()
        .unwrap_or_else(default_socket_path)
}
