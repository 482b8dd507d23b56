//! Corten Template CLI
//!
//! Entry point for the template renderer. Parses CLI arguments, sets up
//! logging and delegates to the Runner.

use std::io::Write;

use clap::Parser as ClapParser;
use template_cli::{Cli, CliError, Runner};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = Runner::from_cli(&cli).and_then(|runner| runner.run(&cli));
    match result {
        Ok(output) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(output.as_bytes()).and_then(|_| stdout.flush()) {
                eprintln!("Error: {}", e);
                std::process::exit(2);
            }
        }
        Err(CliError::Template(e)) => {
            if e.stack.is_empty() {
                eprintln!("{}", e);
            } else {
                eprintln!("{}", e.traceback());
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
