use clap::Parser;
use mongogen::cli::{self, Args};
use mongogen::error::ErrorReport;
use std::process::exit;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    cli::init_logging();
    let phase = args.command.phase();

    if let Err(error) = cli::run(args).await {
        let report = ErrorReport::new(phase, &error);
        match serde_json::to_string(&report) {
            Ok(rendered) => eprintln!("{rendered}"),
            Err(_) => eprintln!("{error}"),
        }
        exit(error.exit_code());
    }
}
