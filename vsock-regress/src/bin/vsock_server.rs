use std::process;

use log::{error, warn};

use vsock_regress::command_parser::{server_command, ServerArgs};
use vsock_regress::report::{Role, RunReport};
use vsock_regress::{logging, server};

fn main() {
    let matches = server_command().get_matches();
    logging::init(matches.occurrences_of("verbose"));

    let args = match ServerArgs::new_with(&matches) {
        Ok(args) => args,
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    };

    let run = server(args.config);

    if let Some(path) = &args.report {
        let report = RunReport::new(
            Role::Server,
            run.outcome.to_string(),
            run.error.as_ref(),
            run.exchanges,
        );
        if let Err(e) = report.write_to(path) {
            warn!("{:#}", e);
        }
    }

    if let Some(e) = run.error {
        error!("Server {}: {}", run.outcome, e);
        process::exit(e.exit_code());
    }
}
