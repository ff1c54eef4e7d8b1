use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::endpoint::{Endpoint, DEFAULT_PORT, VMADDR_CID_LOCAL};
use crate::error::{RegressError, Result};
use crate::payload::{self, PayloadSpec};
use crate::protocol_helpers::{recv_frame, send_frame};
use crate::report::ExchangeResult;
use crate::transport::{Connection, Connector, VsockConnector};

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded exponential backoff for connecting to a server that may not be
/// listening yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            initial_backoff: DEFAULT_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub payload: PayloadSpec,
    pub retry: RetryPolicy,
    pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: Endpoint::new(VMADDR_CID_LOCAL, DEFAULT_PORT),
            payload: PayloadSpec::default(),
            retry: RetryPolicy::default(),
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

/// Dial `connector`, retrying per `policy`. Never blocks longer than the sum
/// of the policy's backoffs plus the per-attempt connect time.
pub fn connect_with_retry<C: Connector>(connector: &C, policy: &RetryPolicy) -> Result<C::Conn> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = io::Error::new(io::ErrorKind::Other, "no connection attempt made");

    for i in 0..attempts {
        match connector.connect() {
            Ok(conn) => {
                debug!("Connected to {} on attempt {}", connector.target(), i + 1);
                return Ok(conn);
            }
            Err(e) => {
                warn!(
                    "Connect attempt {}/{} to {} failed: {}",
                    i + 1,
                    attempts,
                    connector.target(),
                    e
                );
                last_err = e;
            }
        }

        if i + 1 < attempts {
            thread::sleep(policy.backoff(i));
        }
    }

    Err(RegressError::Connect {
        endpoint: connector.target(),
        attempts,
        source: last_err,
    })
}

/// What a finished client run leaves behind. `exchange` is set once a
/// connection was made, whether or not the exchange passed.
#[derive(Debug)]
pub struct ClientRun {
    pub exchange: Option<ExchangeResult>,
    pub error: Option<RegressError>,
}

impl ClientRun {
    pub fn into_result(self) -> Result<ExchangeResult> {
        match (self.error, self.exchange) {
            (Some(e), _) => Err(e),
            (None, Some(exchange)) => Ok(exchange),
            (None, None) => Err(RegressError::Config("client run made no exchange".to_string())),
        }
    }
}

/// Send `expected` as one frame, read the echo and compare byte for byte.
/// The echo may not be longer than what was sent.
pub fn exchange<S: Connection>(stream: &mut S, expected: &[u8], peer: String) -> ClientRun {
    let started = Instant::now();
    let mut sent = 0u64;
    let mut received = 0u64;

    let result = (|| -> Result<()> {
        send_frame(stream, expected)?;
        sent = expected.len() as u64;
        debug!("Sent {} bytes to {}", sent, peer);

        let response = recv_frame(stream, expected.len() as u64).map_err(|e| {
            if let RegressError::ShortRead { received: partial, .. } = &e {
                received = *partial;
            }
            e
        })?;
        received = response.len() as u64;
        debug!("Received {} bytes from {}", received, peer);

        payload::verify(expected, &response)
    })();

    match result {
        Ok(()) => ClientRun {
            exchange: Some(ExchangeResult::passed(peer, sent, started.elapsed())),
            error: None,
        },
        Err(e) => ClientRun {
            exchange: Some(ExchangeResult::failed(peer, sent, received, started.elapsed())),
            error: Some(e),
        },
    }
}

/// Connect through `connector` and run one verified exchange, keeping the
/// exchange record even when it fails.
pub fn run_recorded<C: Connector>(connector: &C, config: &ClientConfig) -> ClientRun {
    let expected = config.payload.generate();
    let connected = connect_with_retry(connector, &config.retry).and_then(|stream| {
        stream.set_io_timeout(config.io_timeout)?;
        Ok(stream)
    });
    let mut stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            return ClientRun {
                exchange: None,
                error: Some(e),
            }
        }
    };

    let run = exchange(&mut stream, &expected, connector.target());
    if let Some(result) = run.exchange.as_ref().filter(|e| e.passed) {
        info!(
            "Exchange with {} passed: {} bytes ({}) in {} ms",
            result.peer, result.bytes_received, config.payload.pattern, result.elapsed_ms
        );
    }
    run
}

/// Connect through `connector` and run one verified exchange.
pub fn run<C: Connector>(connector: &C, config: &ClientConfig) -> Result<ExchangeResult> {
    run_recorded(connector, config).into_result()
}

/// Send the test payload to the vsock server. Entry point for the client.
pub fn client(config: &ClientConfig) -> ClientRun {
    run_recorded(&VsockConnector::new(config.endpoint), config)
}
