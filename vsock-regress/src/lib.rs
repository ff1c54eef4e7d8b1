pub mod client;
pub mod command_parser;
pub mod endpoint;
pub mod error;
pub mod harness;
pub mod logging;
pub mod payload;
pub mod protocol_helpers;
pub mod report;
pub mod server;
pub mod transport;

pub use client::{client, ClientConfig, ClientRun, RetryPolicy};
pub use endpoint::Endpoint;
pub use error::{RegressError, Result};
pub use harness::{Harness, HarnessConfig, StepCommand};
pub use payload::{Pattern, PayloadSpec};
pub use report::{ExchangeResult, Role, RunReport};
pub use server::{server, Server, ServerConfig, ServerOutcome};
