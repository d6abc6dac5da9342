//! CASI - Compositional Aggregate Stability Index CLI
//!
//! Command-line interface for the LDPSA aggregate stability workflow.

use clap::{Parser, Subcommand, ValueEnum};
use ldpsa_casi::error::Result;
use ldpsa_casi::extreme::PredictionScale;
use ldpsa_casi::pipeline::{derive_only, fetch_data, run, WorkflowConfig, CASI_TABLE_FILE};
use std::path::PathBuf;

/// CLI-friendly prediction scale enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliScale {
    /// Exponentiate the quantile linear predictor before comparison
    Exponentiated,
    /// Compare CASI with the linear predictor directly
    Linear,
}

impl From<CliScale> for PredictionScale {
    fn from(scale: CliScale) -> Self {
        match scale {
            CliScale::Exponentiated => PredictionScale::Exponentiated,
            CliScale::Linear => PredictionScale::Linear,
        }
    }
}

/// Compositional Aggregate Stability Index workflow
#[derive(Parser)]
#[command(name = "casi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Overrides shared by the subcommands that read a configuration.
#[derive(clap::Args)]
struct ConfigArgs {
    /// Path to workflow configuration YAML (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the input tables
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the input archive and extract it into the data directory
    Fetch {
        #[command(flatten)]
        args: ConfigArgs,

        /// Remote archive file id (overrides the configuration)
        #[arg(long)]
        file_id: Option<String>,

        /// Download even when a cached archive exists
        #[arg(long)]
        force: bool,
    },

    /// Derive CASI and write the enriched table without modelling
    Derive {
        #[command(flatten)]
        args: ConfigArgs,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the full workflow: derive, profile, label extremes, fit the site model, report
    Run {
        #[command(flatten)]
        args: ConfigArgs,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Scale of the quantile bounds
        #[arg(long, value_enum)]
        scale: Option<CliScale>,

        /// Skip SVG figures and the HTML report
        #[arg(long)]
        no_figures: bool,
    },

    /// Generate an example workflow configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "casi.yaml")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fetch {
            args,
            file_id,
            force,
        } => cmd_fetch(&args, file_id, force),

        Commands::Derive { args, output } => cmd_derive(&args, output),

        Commands::Run {
            args,
            output,
            scale,
            no_figures,
        } => cmd_run(&args, output, scale, no_figures),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Load the configuration file (or defaults) and apply shared overrides.
fn load_config(args: &ConfigArgs) -> Result<WorkflowConfig> {
    let mut config = match &args.config {
        Some(path) => {
            eprintln!("Loading workflow configuration from {:?}...", path);
            WorkflowConfig::from_file(path)?
        }
        None => WorkflowConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

/// Download and extract the input archive
fn cmd_fetch(args: &ConfigArgs, file_id: Option<String>, force: bool) -> Result<()> {
    let mut config = load_config(args)?;
    if let Some(id) = file_id {
        config.archive.file_id = id;
    }

    let fetched = fetch_data(&config, force)?;
    eprintln!(
        "Done! {} files in {:?}{}",
        fetched.files.len(),
        fetched.data_dir,
        if fetched.downloaded { "" } else { " (cached archive)" }
    );
    for file in &fetched.files {
        eprintln!("  {}", file.display());
    }
    Ok(())
}

/// Derive the enriched table only
fn cmd_derive(args: &ConfigArgs, output: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(args)?;
    if let Some(dir) = output {
        config.output_dir = dir;
    }

    let (table, report) = derive_only(&config)?;
    eprintln!(
        "Done! {} rows written to {:?}",
        table.len(),
        config.output_path(CASI_TABLE_FILE)
    );
    if report.n_without_reference > 0 {
        eprintln!(
            "  {} rows dropped without a '{}' reference",
            report.n_without_reference, config.reference_treatment
        );
    }
    if report.n_without_covariates > 0 {
        eprintln!(
            "  {} rows dropped without covariates",
            report.n_without_covariates
        );
    }
    Ok(())
}

/// Run the full workflow
fn cmd_run(
    args: &ConfigArgs,
    output: Option<PathBuf>,
    scale: Option<CliScale>,
    no_figures: bool,
) -> Result<()> {
    let mut config = load_config(args)?;
    if let Some(dir) = output {
        config.output_dir = dir;
    }
    if let Some(scale) = scale {
        config.prediction_scale = scale.into();
    }
    if no_figures {
        config.figures = false;
    }

    let out = run(&config)?;

    println!("{}", out.profile);
    println!("{}", out.site_model);
    eprintln!(
        "Done! {} rows, {} extreme, {} artifacts in {:?}",
        out.table.len(),
        out.bounds.n_extreme(),
        out.artifacts.len(),
        config.output_dir
    );
    Ok(())
}

/// Generate example workflow configuration
fn cmd_example(output_path: &PathBuf) -> Result<()> {
    let config = WorkflowConfig::default();
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example configuration to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}
