use clap::Parser;
use storage_proxy::config::{Cli, Config};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    storage_proxy::logging::init(&config.logging);

    match storage_proxy::run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "storage proxy exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}
