use clap::Parser;

use loam::cli::{run, Cli};
use loam::LoamError;

fn main() {
    let _telemetry = loam::telemetry::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err:#}");
        let code = err.downcast_ref::<LoamError>().map_or(1, LoamError::exit_code);
        std::process::exit(code);
    }
}
