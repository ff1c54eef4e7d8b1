use env_logger::{Builder, Env};

/// Install the stderr logger. `RUST_LOG` takes precedence over `verbosity`.
pub fn init(verbosity: u64) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}
