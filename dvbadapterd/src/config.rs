//! Configuration file and effective settings.
//!
//! Values come from the command line first, then the TOML file, then the
//! built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::RegistryOptions;
use crate::scheduler::DEFAULT_SCAN_PERIOD;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "dvbadapterd.toml";

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Scan period must be at least one second")]
    InvalidScanPeriod,
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub adapters: AdaptersSection,
    #[serde(default)]
    pub scanner: ScannerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub dump: DumpSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct AdaptersSection {
    /// Bitmask of adapter slots to probe.
    pub mask: Option<u32>,
    pub dev_root: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScannerSection {
    pub period_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StorageSection {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DumpSection {
    pub dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Values given on the command line. `None` means not given.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub adapter_mask: Option<u32>,
    pub dev_root: Option<PathBuf>,
    pub scan_period_secs: Option<u64>,
    pub database: Option<PathBuf>,
    pub dump_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_retention_days: Option<u64>,
}

/// Effective settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub adapter_mask: u32,
    pub dev_root: PathBuf,
    pub scan_period: Duration,
    pub database: PathBuf,
    pub dump_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_retention_days: u64,
    pub log_level: Option<String>,
}

impl Settings {
    pub fn resolve(cli: Overrides, file: ConfigFile) -> Result<Self, ConfigError> {
        let scan_period = match cli.scan_period_secs.or(file.scanner.period_secs) {
            Some(0) => return Err(ConfigError::InvalidScanPeriod),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_SCAN_PERIOD,
        };

        Ok(Self {
            adapter_mask: cli.adapter_mask.or(file.adapters.mask).unwrap_or(u32::MAX),
            dev_root: cli
                .dev_root
                .or_else(|| file.adapters.dev_root.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("/dev/dvb")),
            scan_period,
            database: cli
                .database
                .or_else(|| file.storage.path.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("dvbadapterd.db")),
            dump_dir: cli
                .dump_dir
                .or_else(|| file.dump.dir.map(PathBuf::from))
                .unwrap_or_else(std::env::temp_dir),
            log_dir: cli
                .log_dir
                .or_else(|| file.logging.log_dir.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("logs")),
            log_retention_days: cli
                .log_retention_days
                .or(file.logging.retention_days)
                .unwrap_or(7),
            log_level: file.logging.level,
        })
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            dev_root: self.dev_root.clone(),
            scan_period: self.scan_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(Overrides::default(), ConfigFile::default()).unwrap();
        assert_eq!(settings.adapter_mask, u32::MAX);
        assert_eq!(settings.dev_root, PathBuf::from("/dev/dvb"));
        assert_eq!(settings.scan_period, Duration::from_secs(20));
        assert_eq!(settings.database, PathBuf::from("dvbadapterd.db"));
        assert_eq!(settings.log_retention_days, 7);
        assert!(settings.log_level.is_none());
    }

    #[test]
    fn test_precedence() {
        let file: ConfigFile = toml::from_str(
            r#"
            [adapters]
            mask = 0x3
            dev_root = "/srv/dvb"

            [scanner]
            period_secs = 30

            [storage]
            path = "/var/lib/dvbadapterd/settings.db"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let cli = Overrides {
            adapter_mask: Some(0x1),
            ..Overrides::default()
        };
        let settings = Settings::resolve(cli, file).unwrap();
        assert_eq!(settings.adapter_mask, 0x1);
        assert_eq!(settings.dev_root, PathBuf::from("/srv/dvb"));
        assert_eq!(settings.scan_period, Duration::from_secs(30));
        assert_eq!(
            settings.database,
            PathBuf::from("/var/lib/dvbadapterd/settings.db")
        );
        assert_eq!(settings.log_level.as_deref(), Some("debug"));
        assert_eq!(settings.registry_options().dev_root, PathBuf::from("/srv/dvb"));
    }

    #[test]
    fn test_zero_period_rejected() {
        let cli = Overrides {
            scan_period_secs: Some(0),
            ..Overrides::default()
        };
        assert!(matches!(
            Settings::resolve(cli, ConfigFile::default()),
            Err(ConfigError::InvalidScanPeriod)
        ));
    }

    #[test]
    fn test_bad_file() {
        let err = load_config(Path::new("/nonexistent/dvbadapterd.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(toml::from_str::<ConfigFile>("[adapters]\nmask = \"all\"").is_err());
    }
}
