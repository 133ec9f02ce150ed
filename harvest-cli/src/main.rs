//! Entry point for the `wfs-harvest` binary.
#![forbid(unsafe_code)]

use std::process::ExitCode;

use harvest_cli::CliError;

fn main() -> ExitCode {
    match harvest_cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("wfs-harvest: {err}");
            ExitCode::FAILURE
        }
    }
}
