// tractmap CLI - reallocate census tract counts onto fixed neighborhoods

mod commands;
mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use exit_codes::{realloc_exit_code, EXIT_SUCCESS};
use tractmap_realloc::ReallocError;

#[derive(Parser)]
#[command(name = "tractmap")]
#[command(about = "Areal reallocation of census tract counts onto neighborhood boundaries")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every vintage in a pipeline config and merge the results
    #[command(after_help = "\
Examples:
  tractmap run neighborhoods.toml
  tractmap run neighborhoods.toml --json
  tractmap run neighborhoods.toml --output report.json --csv merged.csv")]
    Run {
        /// Path to the pipeline TOML config
        config: PathBuf,

        /// Print the JSON report to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON report to this file (overrides [output].json)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the merged table to this CSV file (overrides [output].csv)
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Parse and validate a pipeline config without loading any layer
    #[command(after_help = "\
Examples:
  tractmap validate neighborhoods.toml")]
    Validate {
        /// Path to the pipeline TOML config
        config: PathBuf,
    },

    /// Check that a result CSV conserves a source layer's total
    #[command(after_help = "\
Examples:
  tractmap verify tracts_1990.geojson merged.csv --source-field ET1001 --result-field pop90
  tractmap verify tracts_1990.geojson merged.csv --source-field ET1001 --result-field pop90 --expected-delta 12")]
    Verify {
        /// Source polygon layer (GeoJSON)
        source: PathBuf,

        /// Reallocated table (CSV)
        result: PathBuf,

        /// Attribute summed over the source features
        #[arg(long)]
        source_field: String,

        /// Column summed over the result rows
        #[arg(long)]
        result_field: String,

        /// Id column of the result CSV (default: first column)
        #[arg(long)]
        id_column: Option<String>,

        /// Known residual: source total minus reallocated total
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        expected_delta: f64,

        /// Treat missing source values as zero instead of failing
        #[arg(long)]
        missing_as_zero: bool,

        /// Print the check as JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  tractmap-realloc ", env!("CARGO_PKG_VERSION"),
    )
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // Logs go to stderr; stdout is reserved for --json output.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run { config, json, output, csv } => commands::cmd_run(config, json, output, csv),
        Commands::Validate { config } => commands::cmd_validate(config),
        Commands::Verify {
            source,
            result,
            source_field,
            result_field,
            id_column,
            expected_delta,
            missing_as_zero,
            json,
        } => commands::cmd_verify(commands::VerifyArgs {
            source,
            result,
            source_field,
            result_field,
            id_column,
            expected_delta,
            missing_as_zero,
            json,
        }),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReallocError> for CliError {
    fn from(err: ReallocError) -> Self {
        let hint = match &err {
            ReallocError::ProjectionMismatch(_) => {
                Some("reproject every layer to the pipeline's planar CRS before running".to_string())
            }
            ReallocError::UndefinedValue { .. } => {
                Some("set missing_values = \"zero\" to count missing values as zero".to_string())
            }
            ReallocError::ConservationMismatch { .. } => Some(
                "record a known loss with expected_delta, or set fail_on_mismatch = false".to_string(),
            ),
            _ => None,
        };
        Self { code: realloc_exit_code(&err), message: err.to_string(), hint }
    }
}
