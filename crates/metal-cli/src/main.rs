use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

mod commands;
mod logging;
mod toolchain;

/// Metal native build engine.
///
/// Builds C, C++, C++20 module and assembly projects described by metal.toml
/// into archives and applications, recompiling only what changed.
///
/// EXAMPLES:
///     metal build                   Build the project in the current directory
///     metal build -j 8 --target x86_64-linux-gnu
///     metal build --json            Print the build summary as JSON
///     metal commands -o commands.json
///     metal plan                    Show build order and what would rebuild
///     metal clean                   Remove build outputs
///
/// ENVIRONMENT VARIABLES:
///     METAL_LOG         Log filter (e.g. "debug", "metal_build=trace")
///     METAL_JOBS        Default worker count
///     METAL_TARGET      Default build target
///     METAL_OUTPUT      Output directory, relative to each project
///     METAL_JSON        Set to 'true' for JSON output by default
#[derive(Parser)]
#[command(name = "metal")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', long = "directory", global = true, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// More log output (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project and everything it depends on
    ///
    /// EXAMPLES:
    ///     metal build                   Incremental build
    ///     metal build --clean           Remove outputs first
    ///     metal build --force           Rebuild everything, keep outputs
    #[command(visible_alias = "b")]
    Build {
        /// Number of parallel jobs
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
        /// Build target
        #[arg(long)]
        target: Option<String>,
        /// Remove build outputs before building
        #[arg(long)]
        clean: bool,
        /// Ignore recorded fingerprints
        #[arg(long)]
        force: bool,
        /// JSON output
        #[arg(long, env = "METAL_JSON")]
        json: bool,
    },

    /// Export compile command records without building
    ///
    /// EXAMPLES:
    ///     metal commands                Print records to stdout
    ///     metal commands -o cc.json     Write records to a file
    Commands {
        /// Build target
        #[arg(long)]
        target: Option<String>,
        /// Output file (stdout when omitted)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Show the build order and what the next build would run
    Plan {
        /// Build target
        #[arg(long)]
        target: Option<String>,
        /// JSON output
        #[arg(long, env = "METAL_JSON")]
        json: bool,
    },

    /// Remove build outputs of every project in the workspace
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let dir = cli.directory.as_deref();
    match cli.command {
        Commands::Build {
            jobs,
            target,
            clean,
            force,
            json,
        } => {
            let args = commands::build::BuildArgs {
                jobs,
                target,
                clean,
                force,
                json,
                quiet: cli.quiet,
            };
            let code = commands::build::run(dir, args)?;
            if code != 0 {
                process::exit(code);
            }
        }
        Commands::Commands { target, output } => {
            commands::export::run(dir, target, output.as_deref())?;
        }
        Commands::Plan { target, json } => {
            commands::plan::run(dir, target, json)?;
        }
        Commands::Clean => {
            commands::clean::run(dir, cli.quiet)?;
        }
    }

    Ok(())
}
