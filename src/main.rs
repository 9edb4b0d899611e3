mod backup;
mod cli;
mod config;
mod database;
mod error;
mod hash;
mod inspect;
mod logging;
mod runner;
mod schema;

use cli::Cli;
use log::error;

fn main() {
    // Log level comes from the config file, VOCAB_MIGRATE_LOGGING__LEVEL or RUST_LOG:
    // error → warn → info → debug → trace
    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(err.exit_code());
    }
}
