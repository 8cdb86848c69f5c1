//! Nexus server binary.

use clap::Parser;
use nexus_runtime::ApplicationCore;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "nexus", about = "Nexus modular application runtime", version)]
struct Args {
    /// Path to the configuration file (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// Single-threaded event loop on the main thread; blocking work goes
// through the concurrency manager's pools.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let app = match ApplicationCore::build(args.config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to assemble application: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app.initialize().await {
        eprintln!("Failed to initialize application: {e}");
        // Take down whatever did come up
        let _ = app.shutdown().await;
        return ExitCode::FAILURE;
    }

    if let Err(e) = app.run().await {
        eprintln!("Application error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
