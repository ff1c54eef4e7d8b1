//! Sequences the server and client processes for one regression scenario.
//!
//! The server is started first and given a short grace period; if it exits in
//! that window (bind failure, bad config) the client is never run. The first
//! failing step ends the scenario and the end banner is not printed.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{RegressError, Result};

pub const START_BANNER: &str = "vsock regression test: starting";
pub const PASS_BANNER: &str = "vsock regression test: passed";

pub const SERVER_BIN: &str = "vsock_server";
pub const CLIENT_BIN: &str = "vsock_client";

pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(500);
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A program the harness runs as one step.
#[derive(Debug, Clone)]
pub struct StepCommand {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl StepCommand {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        StepCommand {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn spawn(&self) -> Result<Child> {
        debug!("Starting {}: {} {:?}", self.name, self.program.display(), self.args);
        Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .map_err(|e| RegressError::StepFailed {
                step: self.name.clone(),
                code: None,
                detail: format!("cannot start {}: {}", self.program.display(), e),
            })
    }

    fn failed(&self, status: ExitStatus, context: &str) -> RegressError {
        RegressError::StepFailed {
            step: self.name.clone(),
            code: status.code(),
            detail: format!("{} ({})", context, status),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub server: StepCommand,
    pub client: StepCommand,
    /// How long the server must stay up before the client is started
    pub startup_grace: Duration,
    /// How long the client may run before both steps are killed
    pub client_timeout: Duration,
    /// How long to wait for the server after the client finished
    pub server_timeout: Duration,
    pub runs: u32,
}

impl HarnessConfig {
    /// Run `vsock_server` and `vsock_client` from `bin_dir`.
    pub fn from_bin_dir(bin_dir: &Path) -> Self {
        HarnessConfig {
            server: StepCommand::new("server", bin_dir.join(SERVER_BIN)),
            client: StepCommand::new("client", bin_dir.join(CLIENT_BIN)),
            startup_grace: DEFAULT_STARTUP_GRACE,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            runs: 1,
        }
    }
}

/// Directory holding the running executable; the sibling binaries live there.
pub fn default_bin_dir() -> Result<PathBuf> {
    let exe = env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| RegressError::Config(format!("{} has no parent directory", exe.display())))
}

/// Kills the child on drop unless it already exited.
struct RunningStep {
    name: String,
    child: Child,
}

impl RunningStep {
    /// Wait up to `timeout` for the child to exit.
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Drop for RunningStep {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!("Stopping {}", self.name);
            self.child
                .kill()
                .unwrap_or_else(|e| warn!("Failed to kill {}: {}", self.name, e));
            self.child
                .wait()
                .map(|_| ())
                .unwrap_or_else(|e| warn!("Failed to reap {}: {}", self.name, e));
        }
    }
}

pub struct Harness<W: Write> {
    config: HarnessConfig,
    out: W,
}

impl<W: Write> Harness<W> {
    pub fn new(config: HarnessConfig, out: W) -> Self {
        Harness { config, out }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Run every configured scenario, stopping at the first failure. The end
    /// banner is written only when all of them pass.
    pub fn run(&mut self) -> Result<()> {
        writeln!(self.out, "{}", START_BANNER)?;
        self.out.flush()?;

        for run in 1..=self.config.runs {
            info!("Scenario run {}/{}", run, self.config.runs);
            self.run_once()?;
        }

        writeln!(self.out, "{}", PASS_BANNER)?;
        self.out.flush()?;
        Ok(())
    }

    fn run_once(&self) -> Result<()> {
        let server_cmd = &self.config.server;
        let client_cmd = &self.config.client;

        let mut server = RunningStep {
            name: server_cmd.name.clone(),
            child: server_cmd.spawn()?,
        };

        if let Some(status) = server.wait_timeout(self.config.startup_grace)? {
            return Err(server_cmd.failed(status, "exited before the client started"));
        }

        let mut client = RunningStep {
            name: client_cmd.name.clone(),
            child: client_cmd.spawn()?,
        };
        let client_status = match client.wait_timeout(self.config.client_timeout)? {
            Some(status) => status,
            None => {
                // both steps are killed when dropped
                return Err(RegressError::Timeout(format!(
                    "{} still running after {} ms",
                    client_cmd.name,
                    self.config.client_timeout.as_millis()
                )));
            }
        };
        if !client_status.success() {
            // server is killed when dropped
            return Err(client_cmd.failed(client_status, "client run failed"));
        }
        debug!("{} finished: {}", client_cmd.name, client_status);

        match server.wait_timeout(self.config.server_timeout)? {
            Some(status) if status.success() => {
                info!("Server and client both exited cleanly");
                Ok(())
            }
            Some(status) => Err(server_cmd.failed(status, "server run failed")),
            None => Err(RegressError::Timeout(format!(
                "{} still running {} ms after the client finished",
                server_cmd.name,
                self.config.server_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_dir_layout() {
        let config = HarnessConfig::from_bin_dir(Path::new("/opt/vsock"));
        assert_eq!(config.server.program, PathBuf::from("/opt/vsock/vsock_server"));
        assert_eq!(config.client.program, PathBuf::from("/opt/vsock/vsock_client"));
        assert_eq!(config.runs, 1);
    }

    #[test]
    fn missing_binary_fails_before_start() {
        let mut config = HarnessConfig::from_bin_dir(Path::new("/nonexistent/vsock"));
        config.startup_grace = Duration::from_millis(10);
        let mut harness = Harness::new(config, Vec::new());

        match harness.run() {
            Err(RegressError::StepFailed { step, code, .. }) => {
                assert_eq!(step, "server");
                assert_eq!(code, None);
            }
            other => panic!("expected step failure, got {:?}", other),
        }
        let out = String::from_utf8(harness.into_output()).unwrap();
        assert_eq!(out, format!("{}\n", START_BANNER));
    }
}
