mod cli;
mod commands;
mod logging;

use cli::Settings;
use std::process::ExitCode;

fn main() -> ExitCode {
    let _logging = logging::setup_logging_and_profiling();
    tracing::info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_cli();
    match commands::run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
