use std::process;

use log::{error, warn};

use vsock_regress::command_parser::{client_command, ClientArgs};
use vsock_regress::report::{Role, RunReport};
use vsock_regress::{client, logging};

fn main() {
    let matches = client_command().get_matches();
    logging::init(matches.occurrences_of("verbose"));

    let args = match ClientArgs::new_with(&matches) {
        Ok(args) => args,
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    };

    let run = client(&args.config);

    if let Some(path) = &args.report {
        let outcome = if run.error.is_none() { "passed" } else { "failed" };
        let report = RunReport::new(
            Role::Client,
            outcome,
            run.error.as_ref(),
            run.exchange.iter().cloned().collect(),
        );
        if let Err(e) = report.write_to(path) {
            warn!("{:#}", e);
        }
    }

    if let Err(e) = run.into_result() {
        error!("Client failed: {}", e);
        process::exit(e.exit_code());
    }
}
