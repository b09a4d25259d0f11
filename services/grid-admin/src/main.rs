//! Operator CLI for hourly grid datasets.
//!
//! Builds a dataset from a YAML config and inspects its spans and provenance.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hourly_grid::{format_hour, parse_hour, DatasetConfig, GridDataset, Stream};

#[derive(Parser, Debug)]
#[command(name = "grid-admin")]
#[command(about = "Build and inspect hourly grid datasets")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate a new dataset from a YAML config
    Build {
        /// Dataset configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory for the new dataset
        #[arg(short, long)]
        path: PathBuf,

        /// Centre the window on this hour ("YYYY-MM-DD:HH") instead of the
        /// configured start and end
        #[arg(long)]
        reference: Option<String>,

        /// Days of observations before the reference hour
        #[arg(long, default_value_t = 10, env = "HOURLY_GRID_OBS_DAYS")]
        obs_days: u32,

        /// Days of forecast after the reference hour
        #[arg(long, default_value_t = 7, env = "HOURLY_GRID_FCAST_DAYS")]
        fcast_days: u32,
    },

    /// Show dataset window, stream spans and time markers
    Info {
        /// Dataset directory
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Dump provenance records as JSON lines
    Provenance {
        /// Dataset directory
        #[arg(short, long)]
        path: PathBuf,

        /// Only records written by this stream
        #[arg(short, long)]
        stream: Option<Stream>,

        /// Skip hours that were never written
        #[arg(long)]
        non_empty: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Build {
            config,
            path,
            reference,
            obs_days,
            fcast_days,
        } => build(config, path, reference, obs_days, fcast_days),
        Command::Info { path } => show_info(path),
        Command::Provenance {
            path,
            stream,
            non_empty,
        } => dump_provenance(path, stream, non_empty),
    }
}

fn build(
    config_path: PathBuf,
    path: PathBuf,
    reference: Option<String>,
    obs_days: u32,
    fcast_days: u32,
) -> Result<()> {
    let mut config = DatasetConfig::from_yaml_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.apply_env_overrides();

    if let Some(reference) = reference {
        let reference = parse_hour(&reference).context("parsing --reference")?;
        config = config.with_window_around(reference, obs_days, fcast_days)?;
    }
    config.validate()?;

    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    let dataset = GridDataset::create_zarr(&path, &config)
        .with_context(|| format!("building dataset at {}", path.display()))?;
    info!(
        dataset = %dataset.name(),
        path = %path.display(),
        hours = dataset.axis().len(),
        "Dataset ready"
    );
    dataset.close();
    Ok(())
}

fn show_info(path: PathBuf) -> Result<()> {
    let dataset = GridDataset::open_zarr(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    let axis = dataset.axis();
    let dims = dataset.dimensions();

    println!("dataset:    {} ({})", dataset.name(), dataset.units());
    println!(
        "window:     {} thru {} ({} hours, {})",
        format_hour(&axis.start()),
        format_hour(&axis.end()),
        axis.len(),
        axis.timezone()
    );
    println!("grid:       {} rows x {} cols", dims.rows, dims.cols);

    for stream in Stream::ALL {
        match dataset.stream_timespan(stream) {
            Some((start, end)) => println!(
                "{:<12}{} thru {}",
                format!("{}:", stream),
                format_hour(&start),
                format_hour(&end)
            ),
            None => println!("{:<12}-", format!("{}:", stream)),
        }
    }

    let marker = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| format_hour(&t)).unwrap_or_else(|| "-".to_string())
    };
    println!("last obs:   {}", marker(dataset.last_obs_time()));
    println!("last valid: {}", marker(dataset.last_valid_time()));
    Ok(())
}

fn dump_provenance(path: PathBuf, stream: Option<Stream>, non_empty: bool) -> Result<()> {
    let dataset = GridDataset::open_zarr(&path)
        .with_context(|| format!("opening {}", path.display()))?;

    for record in dataset.provenance()? {
        if non_empty && record.is_empty() {
            continue;
        }
        if stream.is_some() && record.stream() != stream {
            continue;
        }
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
