use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use visipipe::Core::config::Config;
use visipipe::Pipeline::mode::gpu_test_mode;

/// Correlator data-plane pipeline runner.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML pipeline configuration.
    #[arg(short, long, default_value = "visipipe.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let mut mode = gpu_test_mode(&config)?;
    mode.start();

    let stop = mode.stop_handle();
    ctrlc::set_handler(move || {
        info!("stop requested");
        stop.stop();
    })?;

    // Blocks until the graph drains (finite sources propagate EOF) or the
    // signal handler cancels the waits.
    mode.join();
    Ok(())
}
