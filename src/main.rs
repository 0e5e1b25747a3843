use anyhow::Context;
use clap::Parser;
use gcodelink::{controller_config, init_logging, Config, Controller, NoOpTransport};
use std::path::PathBuf;

/// Command-line arguments for the dry-run preprocessor
#[derive(Debug, Parser)]
#[command(name = "gcodelink")]
#[command(about = "Preprocess a G-code program the way the controller would stream it")]
#[command(version)]
struct Cli {
    /// G-code program to preprocess
    program: PathBuf,

    /// Config file (TOML or JSON); defaults to the platform config directory
    #[arg(long, short)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    tracing::info!(
        "GCodeLink {} (built {})",
        gcodelink::VERSION,
        gcodelink::BUILD_DATE
    );

    // Dry run: preprocess through the controller without a device attached
    let controller = Controller::new(
        controller_config(&config.controller),
        Box::new(NoOpTransport::new()),
    );
    let loaded = controller
        .load_program_file(&cli.program)
        .with_context(|| format!("loading {}", cli.program.display()))?;

    for line in loaded.lines() {
        println!("{}", line);
    }

    tracing::info!(
        "{}: {} source lines, {} commands",
        loaded.name(),
        loaded.source().len(),
        loaded.lines().len()
    );
    Ok(())
}
