use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use wafe::{read_config, run_extract, run_plot, PlotFormat, WafeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Critical | LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

#[derive(Parser)]
#[command(name = "wafe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract waveform features for empirical scaling relations")]
struct Cli {
    /// Verbosity of log messages
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    loglevel: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute all configured measures for all events and stations
    Extract {
        /// Configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Write intermediate traces and windows below the output path
        #[arg(long)]
        debug: bool,
    },

    /// Summarise extraction results against distance and magnitude
    Plot {
        /// Output directory of an extraction run
        #[arg(value_name = "DIR")]
        results: PathBuf,

        /// Output format, may be repeated
        #[arg(long = "format", value_enum, default_values_t = [PlotFormat::Csv])]
        formats: Vec<PlotFormat>,
    },
}

fn run(cli: Cli) -> Result<(), WafeError> {
    match cli.command {
        Commands::Extract { config, debug } => {
            let config = read_config(&config)?;
            let engine = config.get_engine();
            run_extract(&config, &engine, debug)
        }
        Commands::Plot { results, formats } => {
            run_plot(&results, &formats)?;
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.loglevel.into())
        .parse_default_env()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("wafe: error: {e}");
            ExitCode::FAILURE
        }
    }
}
