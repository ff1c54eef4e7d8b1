use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::endpoint::{Endpoint, DEFAULT_PORT};
use crate::error::{RegressError, Result};
use crate::payload::{self, PayloadSpec};
use crate::protocol_helpers::{recv_frame, send_frame, MAX_FRAME_LEN};
use crate::report::ExchangeResult;
use crate::transport::{accept_timeout, bind_vsock, Connection, Listener};

pub const DEFAULT_MAX_CONNECTIONS: usize = 1;
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
// Same bound the client validates its payload size against
pub const DEFAULT_MAX_PAYLOAD: u64 = MAX_FRAME_LEN;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u32,
    /// Number of exchanges after which the server completes
    pub max_connections: usize,
    pub accept_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
    pub max_payload: u64,
    /// When set, received data must match this payload
    pub verify: Option<PayloadSpec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            accept_timeout: Some(DEFAULT_ACCEPT_TIMEOUT),
            io_timeout: Some(crate::client::DEFAULT_IO_TIMEOUT),
            max_payload: DEFAULT_MAX_PAYLOAD,
            verify: None,
        }
    }
}

/// Terminal state of a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOutcome {
    Completed,
    TimedOut,
    Failed,
}

impl ServerOutcome {
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ServerOutcome::Completed,
            Err(RegressError::Timeout(_)) => ServerOutcome::TimedOut,
            Err(_) => ServerOutcome::Failed,
        }
    }
}

impl fmt::Display for ServerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerOutcome::Completed => "completed",
            ServerOutcome::TimedOut => "timed-out",
            ServerOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Single accept loop serving a bounded number of echo exchanges.
pub struct Server {
    config: ServerConfig,
    expected: Option<Vec<u8>>,
    exchanges: Vec<ExchangeResult>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let expected = config.verify.map(|spec| spec.generate());
        Server {
            config,
            expected,
            exchanges: Vec::new(),
        }
    }

    pub fn into_exchanges(self) -> Vec<ExchangeResult> {
        self.exchanges
    }

    /// Accept up to `max_connections` connections on `listener`. The first
    /// failed exchange or timeout ends the run; a failed exchange is still
    /// recorded.
    pub fn serve<L: Listener>(&mut self, listener: &L) -> Result<()> {
        while self.exchanges.len() < self.config.max_connections {
            let (mut conn, peer) = accept_timeout(listener, self.config.accept_timeout)?;
            conn.set_io_timeout(self.config.io_timeout)?;

            let started = Instant::now();
            let mut progress = Progress::default();
            let result = self.handle_connection(&mut conn, &peer, &mut progress);
            match result {
                Ok(()) => {
                    info!(
                        "Exchange {}/{} with {} completed: {} bytes",
                        self.exchanges.len() + 1,
                        self.config.max_connections,
                        peer,
                        progress.received
                    );
                    self.exchanges
                        .push(ExchangeResult::passed(peer, progress.received, started.elapsed()));
                }
                Err(e) => {
                    error!("Error handling connection from {}: {}", peer, e);
                    self.exchanges.push(ExchangeResult::failed(
                        peer,
                        progress.sent,
                        progress.received,
                        started.elapsed(),
                    ));
                    return Err(e);
                }
            }
            // conn is dropped here, closing the connection
        }

        Ok(())
    }

    fn handle_connection<S: Connection>(
        &self,
        conn: &mut S,
        peer: &str,
        progress: &mut Progress,
    ) -> Result<()> {
        let data = recv_frame(conn, self.config.max_payload).map_err(|e| {
            if let RegressError::ShortRead { received, .. } = &e {
                progress.received = *received;
            }
            e
        })?;
        progress.received = data.len() as u64;
        debug!("Received {} bytes from {}", data.len(), peer);

        if let Some(expected) = &self.expected {
            payload::verify(expected, &data)?;
        }

        send_frame(conn, &data)?;
        progress.sent = data.len() as u64;
        debug!("Echoed {} bytes to {}", data.len(), peer);

        Ok(())
    }
}

/// Payload bytes moved on one connection
#[derive(Debug, Default)]
struct Progress {
    sent: u64,
    received: u64,
}

/// What a finished server run leaves behind.
#[derive(Debug)]
pub struct ServerRun {
    pub outcome: ServerOutcome,
    pub exchanges: Vec<ExchangeResult>,
    pub error: Option<RegressError>,
}

/// Bind the vsock port and serve until done. Entry point for the server.
pub fn server(config: ServerConfig) -> ServerRun {
    let listener = match bind_vsock(config.port) {
        Ok(listener) => listener,
        Err(e) => {
            return ServerRun {
                outcome: ServerOutcome::Failed,
                exchanges: Vec::new(),
                error: Some(e),
            }
        }
    };
    info!(
        "Server listening on {} (expecting {} connection(s))",
        Endpoint::listen_any(config.port),
        config.max_connections
    );

    let mut server = Server::new(config);
    let result = server.serve(&listener);
    let outcome = ServerOutcome::of(&result);
    info!("Server {}", outcome);

    ServerRun {
        outcome,
        exchanges: server.into_exchanges(),
        error: result.err(),
    }
}
