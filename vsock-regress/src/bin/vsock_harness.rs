use std::io;
use std::process;

use log::error;

use vsock_regress::command_parser::{harness_command, HarnessArgs};
use vsock_regress::{logging, Harness};

fn main() {
    let matches = harness_command().get_matches();
    logging::init(matches.occurrences_of("verbose"));

    let args = match HarnessArgs::new_with(&matches) {
        Ok(args) => args,
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    };

    let mut harness = Harness::new(args.config, io::stdout());
    if let Err(e) = harness.run() {
        error!("Regression test failed: {}", e);
        process::exit(e.exit_code());
    }
}
