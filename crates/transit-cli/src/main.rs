//! `posdao-transit` binary

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use transit_cli::Cli;
use transit_core::TransitError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match transit_cli::run(cli).await {
        Ok(Some(report)) => {
            println!("current block: {}", report.current_block);
            println!("transition block: {}", report.transition_block);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<TransitError>() {
                Some(transit) => eprintln!("error [{:?}]: {e:#}", transit.class()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
