//! dvbadapterd: DVB adapter manager.
//!
//! Discovers DVB adapters, keeps their configuration in a settings store
//! and scans their muxes while they are idle.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap_num::maybe_hex;
use log::{error, info};

use dvbadapterd::adapter::LinuxDvb;
use dvbadapterd::collaborators::{Collaborators, FileDumps};
use dvbadapterd::config::{self, ConfigFile, Overrides, Settings, DEFAULT_CONFIG_FILE};
use dvbadapterd::logging;
use dvbadapterd::scheduler::{ScanTimers, FIRST_SCAN_DELAY};
use dvbadapterd::store::SqliteStore;
use dvbadapterd::AdapterRegistry;

/// dvbadapterd - DVB adapter manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the settings database
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Bitmask of adapter slots to probe (decimal or 0x-prefixed hex)
    #[arg(short, long, value_parser = maybe_hex::<u32>)]
    adapters: Option<u32>,

    /// Directory holding the adapterN device directories
    #[arg(long)]
    dev_root: Option<PathBuf>,

    /// Idle scan period in seconds
    #[arg(long)]
    scan_period: Option<u64>,

    /// Directory for raw mux dumps
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            adapter_mask: self.adapters,
            dev_root: self.dev_root.clone(),
            scan_period_secs: self.scan_period,
            database: self.database.clone(),
            dump_dir: self.dump_dir.clone(),
            log_dir: self.log_dir.clone(),
            log_retention_days: self.log_retention_days,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    let file_config = match &config_path {
        Some(path) => match config::load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    let settings = Settings::resolve(args.overrides(), file_config)?;

    logging::init_logging(
        &settings.log_dir,
        settings.log_retention_days,
        args.verbose,
        settings.log_level.as_deref(),
    )?;

    info!("Opening settings database: {:?}", settings.database);
    let store = match SqliteStore::open(&settings.database) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open settings database: {}", e);
            return Err(e.into());
        }
    };

    let collab = Collaborators {
        dumps: Arc::new(FileDumps::new(settings.dump_dir.clone())),
        ..Collaborators::default()
    };
    let registry = Arc::new(AdapterRegistry::new(
        store,
        Arc::new(LinuxDvb::new()),
        collab,
        settings.registry_options(),
    ));

    let init_registry = Arc::clone(&registry);
    let mask = settings.adapter_mask;
    let present = tokio::task::spawn_blocking(move || init_registry.init(mask)).await??;
    info!(
        "{} adapter(s) present, {} configured",
        present.len(),
        registry.identifiers().len()
    );

    let mut timers = ScanTimers::new();
    for identifier in &present {
        timers.arm(&registry, identifier, FIRST_SCAN_DELAY);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    timers.shutdown().await;
    let shutdown_registry = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || shutdown_registry.shutdown()).await?;

    Ok(())
}
