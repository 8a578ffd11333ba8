// Entry point for the build trigger daemon.
// Parses configuration, initializes logging and hands off to the App
// composition root. Exit code is non-zero on configuration errors and
// fatal pipeline errors, zero on clean shutdown.

use clap::Parser;
use trigger_listener::app::App;
use trigger_listener::config::Settings;

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    let exit_code = runtime.block_on(run());
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let settings = Settings::parse();
    let config = match settings.into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    // Held until exit so buffered log lines reach the file.
    let _log_guard = match trigger_common::logging::init(&config.log) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("cannot initialize logging: {err:#}");
            return 1;
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        queue = %config.queue_url,
        "Build trigger starting"
    );

    match App::new(config).run().await {
        Ok(()) => {
            tracing::info!("Pipeline finished cleanly");
            0
        }
        Err(err) => {
            tracing::error!("Pipeline failed: {err:#}");
            eprintln!("{err:#}");
            1
        }
    }
}
