// Command line and environment configuration for the three binaries. Every
// option has a flag, an environment variable and a default, so each binary
// also runs with no arguments at all.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Arg, ArgMatches, Command};

use crate::client::{ClientConfig, RetryPolicy};
use crate::endpoint::Endpoint;
use crate::error::{RegressError, Result};
use crate::harness::{default_bin_dir, HarnessConfig};
use crate::payload::{Pattern, PayloadSpec};
use crate::protocol_helpers::MAX_FRAME_LEN;
use crate::server::ServerConfig;

fn verbose_arg() -> Arg<'static> {
    Arg::new("verbose")
        .short('v')
        .long("verbose")
        .multiple_occurrences(true)
        .help("Raise log level (-v debug, -vv trace); RUST_LOG overrides")
}

fn value_arg(name: &'static str, env: &'static str, default: &'static str) -> Arg<'static> {
    Arg::new(name)
        .long(name)
        .env(env)
        .takes_value(true)
        .default_value(default)
}

fn port_arg() -> Arg<'static> {
    value_arg("port", "VSOCK_PORT", "5005").help("vsock port")
}

fn payload_args() -> Vec<Arg<'static>> {
    vec![
        value_arg("payload-size", "VSOCK_PAYLOAD_SIZE", "4096").help("Test payload size in bytes"),
        value_arg("pattern", "VSOCK_PATTERN", "counter")
            .help("Payload pattern: 'counter' or 'seed:<n>'"),
    ]
}

fn io_timeout_arg() -> Arg<'static> {
    value_arg("io-timeout-ms", "VSOCK_IO_TIMEOUT_MS", "10000")
        .help("Read/write timeout in milliseconds, 0 to disable")
}

fn report_arg() -> Arg<'static> {
    Arg::new("report")
        .long("report")
        .env("VSOCK_REPORT")
        .takes_value(true)
        .help("Write a JSON run report to this path")
}

pub fn server_command() -> Command<'static> {
    Command::new("vsock_server")
        .about("Echo server for the vsock regression test")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(verbose_arg())
        .arg(port_arg())
        .arg(
            value_arg("max-connections", "VSOCK_MAX_CONNECTIONS", "1")
                .help("Exchanges to serve before exiting"),
        )
        .arg(
            value_arg("accept-timeout-ms", "VSOCK_ACCEPT_TIMEOUT_MS", "30000")
                .help("Accept timeout in milliseconds, 0 to disable"),
        )
        .arg(io_timeout_arg())
        .arg(
            value_arg("max-payload", "VSOCK_MAX_PAYLOAD", "16777216")
                .help("Largest frame accepted, in bytes"),
        )
        .arg(
            Arg::new("verify")
                .long("verify")
                .env("VSOCK_VERIFY")
                .help("Check received data against the configured payload"),
        )
        .args(payload_args())
        .arg(report_arg())
}

pub fn client_command() -> Command<'static> {
    Command::new("vsock_client")
        .about("Client for the vsock regression test")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(verbose_arg())
        .arg(value_arg("cid", "VSOCK_CID", "1").help("Context ID of the server"))
        .arg(port_arg())
        .args(payload_args())
        .arg(
            value_arg("connect-attempts", "VSOCK_CONNECT_ATTEMPTS", "5")
                .help("Connection attempts before giving up"),
        )
        .arg(
            value_arg("backoff-ms", "VSOCK_BACKOFF_MS", "100")
                .help("Delay after the first failed attempt; doubles each retry"),
        )
        .arg(
            value_arg("max-backoff-ms", "VSOCK_MAX_BACKOFF_MS", "2000")
                .help("Upper bound for the retry delay"),
        )
        .arg(io_timeout_arg())
        .arg(report_arg())
}

pub fn harness_command() -> Command<'static> {
    Command::new("vsock_harness")
        .about("Runs vsock_server and vsock_client and reports pass/fail")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(verbose_arg())
        .arg(
            Arg::new("bin-dir")
                .long("bin-dir")
                .env("VSOCK_BIN_DIR")
                .takes_value(true)
                .help("Directory holding vsock_server and vsock_client [default: harness directory]"),
        )
        .arg(
            value_arg("startup-grace-ms", "VSOCK_STARTUP_GRACE_MS", "500")
                .help("Time the server gets to start listening"),
        )
        .arg(
            value_arg("client-timeout-ms", "VSOCK_CLIENT_TIMEOUT_MS", "120000")
                .help("Time the client may run before the scenario fails"),
        )
        .arg(
            value_arg("server-timeout-ms", "VSOCK_SERVER_TIMEOUT_MS", "60000")
                .help("Time to wait for the server after the client finished"),
        )
        .arg(value_arg("runs", "VSOCK_RUNS", "1").help("Number of consecutive scenario runs"))
}

fn parse_arg<T>(args: &ArgMatches, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = args
        .value_of(name)
        .ok_or_else(|| RegressError::Config(format!("Missing value for --{}", name)))?;
    raw.trim()
        .parse::<T>()
        .map_err(|e| RegressError::Config(format!("Invalid value '{}' for --{}: {}", raw, name, e)))
}

/// Milliseconds to a timeout; zero means none.
fn parse_timeout(args: &ArgMatches, name: &str) -> Result<Option<Duration>> {
    let millis: u64 = parse_arg(args, name)?;
    Ok(match millis {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    })
}

fn parse_payload(args: &ArgMatches) -> Result<PayloadSpec> {
    let size: u64 = parse_arg(args, "payload-size")?;
    if size > MAX_FRAME_LEN {
        return Err(RegressError::Config(format!(
            "Payload size {} exceeds the frame limit {}",
            size, MAX_FRAME_LEN
        )));
    }
    let pattern: Pattern = args.value_of("pattern").unwrap_or("counter").parse()?;
    Ok(PayloadSpec::new(size as usize, pattern))
}

fn parse_report(args: &ArgMatches) -> Option<PathBuf> {
    args.value_of("report").map(PathBuf::from)
}

pub struct ServerArgs {
    pub config: ServerConfig,
    pub report: Option<PathBuf>,
}

impl ServerArgs {
    pub fn new_with(args: &ArgMatches) -> Result<Self> {
        let max_payload: u64 = parse_arg(args, "max-payload")?;
        if max_payload > MAX_FRAME_LEN {
            return Err(RegressError::Config(format!(
                "--max-payload {} exceeds the frame limit {}",
                max_payload, MAX_FRAME_LEN
            )));
        }

        let max_connections: usize = parse_arg(args, "max-connections")?;
        if max_connections == 0 {
            return Err(RegressError::Config(
                "--max-connections must be at least 1".to_string(),
            ));
        }

        let verify = if args.is_present("verify") {
            let spec = parse_payload(args)?;
            if spec.size as u64 > max_payload {
                return Err(RegressError::Config(format!(
                    "Verified payload size {} exceeds --max-payload {}",
                    spec.size, max_payload
                )));
            }
            Some(spec)
        } else {
            None
        };

        Ok(ServerArgs {
            config: ServerConfig {
                port: parse_arg(args, "port")?,
                max_connections,
                accept_timeout: parse_timeout(args, "accept-timeout-ms")?,
                io_timeout: parse_timeout(args, "io-timeout-ms")?,
                max_payload,
                verify,
            },
            report: parse_report(args),
        })
    }
}

pub struct ClientArgs {
    pub config: ClientConfig,
    pub report: Option<PathBuf>,
}

impl ClientArgs {
    pub fn new_with(args: &ArgMatches) -> Result<Self> {
        let max_attempts: u32 = parse_arg(args, "connect-attempts")?;
        if max_attempts == 0 {
            return Err(RegressError::Config(
                "--connect-attempts must be at least 1".to_string(),
            ));
        }

        Ok(ClientArgs {
            config: ClientConfig {
                endpoint: Endpoint::new(parse_arg(args, "cid")?, parse_arg(args, "port")?),
                payload: parse_payload(args)?,
                retry: RetryPolicy {
                    max_attempts,
                    initial_backoff: Duration::from_millis(parse_arg(args, "backoff-ms")?),
                    max_backoff: Duration::from_millis(parse_arg(args, "max-backoff-ms")?),
                },
                io_timeout: parse_timeout(args, "io-timeout-ms")?,
            },
            report: parse_report(args),
        })
    }
}

pub struct HarnessArgs {
    pub config: HarnessConfig,
}

impl HarnessArgs {
    pub fn new_with(args: &ArgMatches) -> Result<Self> {
        let bin_dir = match args.value_of("bin-dir") {
            Some(dir) => PathBuf::from(dir),
            None => default_bin_dir()?,
        };

        let runs: u32 = parse_arg(args, "runs")?;
        if runs == 0 {
            return Err(RegressError::Config("--runs must be at least 1".to_string()));
        }

        let mut config = HarnessConfig::from_bin_dir(&bin_dir);
        config.startup_grace = Duration::from_millis(parse_arg(args, "startup-grace-ms")?);
        config.client_timeout = Duration::from_millis(parse_arg(args, "client-timeout-ms")?);
        config.server_timeout = Duration::from_millis(parse_arg(args, "server-timeout-ms")?);
        config.runs = runs;

        Ok(HarnessArgs { config })
    }
}
