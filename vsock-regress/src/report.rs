use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::RegressError;

/// Outcome of a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeResult {
    pub peer: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub passed: bool,
    pub elapsed_ms: u64,
}

impl ExchangeResult {
    pub fn passed(peer: String, bytes: u64, elapsed: Duration) -> Self {
        ExchangeResult {
            peer,
            bytes_sent: bytes,
            bytes_received: bytes,
            passed: true,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// A connection that ended in an error, with the bytes moved before it.
    pub fn failed(peer: String, bytes_sent: u64, bytes_received: u64, elapsed: Duration) -> Self {
        ExchangeResult {
            peer,
            bytes_sent,
            bytes_received,
            passed: false,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub role: Role,
    pub outcome: String,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
    pub exchanges: Vec<ExchangeResult>,
}

impl RunReport {
    pub fn new(
        role: Role,
        outcome: impl Into<String>,
        error: Option<&RegressError>,
        exchanges: Vec<ExchangeResult>,
    ) -> Self {
        RunReport {
            role,
            outcome: outcome.into(),
            error_kind: error.map(|e| e.kind()),
            error: error.map(|e| e.to_string()),
            exchanges,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        Ok(())
    }
}
