//! index-versions - operate the index version engine of a site
//!
//! Usage:
//!   index-versions serve    --site DIR [--config FILE]
//!   index-versions status   --site DIR
//!   index-versions reindex  --site DIR --index NAME [--version N] [--reuse]
//!   index-versions activate --site DIR --index NAME

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use index_versions::{Application, IndexError, SiteConfig};

const DEFAULT_CONFIG: &str = "index-versions.yaml";

#[derive(Parser)]
#[command(name = "index-versions")]
#[command(version, about = "Manage secondary index schema versions and reindexing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SiteArgs {
    /// Site directory
    #[arg(short, long)]
    site: PathBuf,

    /// Site config (default: <site>/index-versions.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise indexes, start online upgrades and wait for a signal
    Serve {
        #[command(flatten)]
        site: SiteArgs,
    },

    /// Print every version of every index with its exists/ready flags
    Status {
        #[command(flatten)]
        site: SiteArgs,
    },

    /// Rebuild one version of an index while the site is not serving
    Reindex {
        #[command(flatten)]
        site: SiteArgs,

        /// Index name
        #[arg(short, long)]
        index: String,

        /// Schema version (default: latest)
        #[arg(short, long)]
        version: Option<u32>,

        /// Keep unchanged documents instead of starting from empty
        #[arg(long, default_value = "false")]
        reuse: bool,
    },

    /// Promote the newest write version of an index without reindexing
    Activate {
        #[command(flatten)]
        site: SiteArgs,

        /// Index name
        #[arg(short, long)]
        index: String,
    },
}

impl SiteArgs {
    fn load(&self) -> Result<Application> {
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(|| self.site.join(DEFAULT_CONFIG));
        let config = SiteConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        Application::from_site_config(&self.site, config)
            .with_context(|| format!("opening site {}", self.site.display()))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("index_versions=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Serve { site } => serve(&site),
        Commands::Status { site } => status(&site),
        Commands::Reindex { site, index, version, reuse } => reindex(&site, &index, version, reuse),
        Commands::Activate { site, index } => activate(&site, &index),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<IndexError>()
                .map(IndexError::code)
                .unwrap_or("ERROR");
            eprintln!("error [{}]: {:#}", code, e);
            ExitCode::FAILURE
        }
    }
}

fn serve(site: &SiteArgs) -> Result<()> {
    let app = site.load()?;
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("registering signal handlers")?;

    app.start()?;
    if let Some(sig) = signals.forever().next() {
        tracing::info!(signal = sig, "shutting down");
    }
    app.stop();
    Ok(())
}

fn status(site: &SiteArgs) -> Result<()> {
    let app = site.load()?;
    for def in app.definitions() {
        let versions = app.manager().scan(def.name())?;
        println!("{}", def.name());
        for v in versions.values() {
            let known = if v.schema.is_some() { "" } else { " (unknown schema)" };
            println!(
                "  {:>6}  exists={:<5} ready={:<5}{}",
                v.version, v.exists, v.ready, known
            );
        }
    }
    Ok(())
}

fn reindex(site: &SiteArgs, index: &str, version: Option<u32>, reuse: bool) -> Result<()> {
    let app = site.load()?;
    let result = app.reindex_offline(index, version, reuse)?;
    println!(
        "{}: {} documents indexed, {} failed in {:.1}s",
        index,
        result.done_count(),
        result.failed_count(),
        result.elapsed().as_secs_f64()
    );
    if !result.success() {
        anyhow::bail!("reindex of '{}' finished with failures", index);
    }
    Ok(())
}

fn activate(site: &SiteArgs, index: &str) -> Result<()> {
    let app = site.load()?;
    let manager = app.manager();
    manager.start()?;
    if manager.activate_latest_index(index)? {
        let version = manager.reindexer_status(index)?.new_version;
        println!("{}: activated version {}", index, version);
    } else {
        println!("{}: already at the latest version", index);
    }
    manager.stop();
    Ok(())
}
