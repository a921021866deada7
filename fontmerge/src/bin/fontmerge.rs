//! fontmerge
//!
//! Builds the unified font families from a folder of sources, and collects
//! the results into one place.

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use fontmerge::{
    deliver, BinaryEngine, BuildConfig, CachedEngine, ConfigError, LayoutMode, LogSink, Pipeline,
};

#[derive(Parser, Debug)]
#[command(version, about = "Merge many fonts into unified font families.")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Where the build configuration comes from.
#[derive(clap::Args, Debug)]
struct ConfigArgs {
    /// A TOML build configuration.
    #[arg(long, conflicts_with_all = ["sources", "layout"])]
    config: Option<PathBuf>,

    /// The sources root, built with the default layout.
    #[arg(long, required_unless_present = "config")]
    sources: Option<PathBuf>,

    /// Whether layout tables are kept. Required with --sources.
    #[arg(long, value_enum)]
    layout: Option<LayoutMode>,
}

impl ConfigArgs {
    fn load(&self) -> Result<BuildConfig, ConfigError> {
        match (&self.config, &self.sources) {
            (Some(path), _) => BuildConfig::load(path),
            // clap guarantees one of the two is present
            (None, sources) => Ok(BuildConfig::new(
                sources.clone().unwrap_or_default(),
                self.layout.unwrap_or(LayoutMode::Preserve),
            )),
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Build the base family and its derived families
    Build {
        #[command(flatten)]
        config: ConfigArgs,
        /// Only build this variant (repeatable)
        #[arg(long)]
        variant: Vec<String>,
        /// Only build this derived family, by name or slug (repeatable)
        #[arg(long)]
        family: Vec<String>,
        /// Skip the derived families
        #[arg(long)]
        no_derived: bool,
        /// Build one variant and one source at a time
        #[arg(long)]
        serial: bool,
    },
    /// Copy every built font into one folder
    Deliver {
        #[command(flatten)]
        config: ConfigArgs,
        /// The destination folder
        #[arg(long)]
        dest: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Build {
            config,
            variant,
            family,
            no_derived,
            serial,
        } => {
            if config.sources.is_some() && config.layout.is_none() {
                eprintln!("--layout is required with --sources");
                return ExitCode::FAILURE;
            }
            let mut config = match config.load() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            config.retain_variants(&variant);
            config.retain_families(&family);
            config.build_derived &= !no_derived;
            config.parallel &= !serial;
            if config.variants.is_empty() {
                eprintln!("no variant matches {variant:?}");
                return ExitCode::FAILURE;
            }

            let engine = CachedEngine::new(BinaryEngine::new(), config.cache_dir());
            let summary = Pipeline::new(config, engine).build();
            print!("{summary}");
            if summary.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Deliver { config, dest } => {
            let config = match config.load() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            match deliver(&config, &dest, &LogSink) {
                Ok(delivered) => {
                    println!("delivered {} fonts to {}", delivered.len(), dest.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
