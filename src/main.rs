use std::path::{Path, PathBuf};

use clap::Parser as _;
use modbus_gw_tools::commands;
use modbus_gw_tools::settings::Settings;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_ENV: &str = "MODBUS_GW_TOOLS_LOG";

#[derive(clap::Parser)]
#[clap(version, about, author)]
struct Cli {
    /// Settings file with a `[working_context]` section.
    #[arg(long, global = true, env = "MODBUS_GW_TOOLS_CONTEXT", default_value = "context.ini")]
    context: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    Sections(commands::sections::Args),
    Gateway(commands::gateway::Args),
    Hosts(commands::hosts::Args),
    Concentrators(commands::concentrators::Args),
    Channels(commands::channels::Args),
    Registers(commands::registers::Args),
    Read(commands::read::Args),
    Interpret(commands::interpret::Args),
    Sync(commands::sync::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn with_settings<E: std::error::Error>(
    context: &Path,
    run: impl FnOnce(&Settings) -> Result<(), E>,
) {
    match Settings::load(context) {
        Ok(settings) => end(run(&settings)),
        Err(e) => end(Err::<(), _>(e)),
    }
}

fn log_filter() -> tracing_subscriber::filter::Targets {
    let default = tracing_subscriber::filter::Targets::new()
        .with_default(tracing_subscriber::filter::LevelFilter::WARN);
    let Ok(description) = std::env::var(LOG_ENV) else {
        return default;
    };
    match description.parse() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("warning: ignoring {LOG_ENV}={description:?}: {e}");
            default
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(log_filter())
        .init();
    let cli = Cli::parse();
    let context = cli.context.as_path();
    match cli.command {
        Commands::Sections(args) => end(commands::sections::run(args)),
        Commands::Concentrators(args) => end(commands::concentrators::run(args)),
        Commands::Channels(args) => end(commands::channels::run(args)),
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Gateway(args) => with_settings(context, |s| commands::gateway::run(args, s)),
        Commands::Hosts(args) => with_settings(context, |s| commands::hosts::run(args, s)),
        Commands::Read(args) => with_settings(context, |s| commands::read::run(args, s)),
        Commands::Interpret(args) => {
            with_settings(context, |s| commands::interpret::run(args, s))
        }
        Commands::Sync(args) => with_settings(context, |s| commands::sync::run(args, s)),
    }
}
