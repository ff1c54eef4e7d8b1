// Shared helpers for the integration tests
#![allow(dead_code)]

use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempDir;

use vsock_regress::client::ClientConfig;
use vsock_regress::{ExchangeResult, PayloadSpec, Result, RetryPolicy, Server, ServerConfig};

/// Scratch directory plus a socket path inside it
pub struct SocketDir {
    _dir: TempDir,
    pub path: PathBuf,
}

pub fn socket_dir() -> SocketDir {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("regress.sock");
    SocketDir { _dir: dir, path }
}

pub fn server_config(verify: Option<PayloadSpec>) -> ServerConfig {
    ServerConfig {
        accept_timeout: Some(Duration::from_secs(5)),
        io_timeout: Some(Duration::from_secs(5)),
        verify,
        ..ServerConfig::default()
    }
}

pub fn client_config(payload: PayloadSpec) -> ClientConfig {
    ClientConfig {
        payload,
        retry: RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(200),
        },
        io_timeout: Some(Duration::from_secs(5)),
        ..ClientConfig::default()
    }
}

/// Run a server on `listener` in a background thread
pub fn spawn_server(
    listener: UnixListener,
    config: ServerConfig,
) -> JoinHandle<(Result<()>, Vec<ExchangeResult>)> {
    thread::spawn(move || {
        let mut server = Server::new(config);
        let result = server.serve(&listener);
        (result, server.into_exchanges())
    })
}
