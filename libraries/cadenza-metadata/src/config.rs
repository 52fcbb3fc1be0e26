/// Metadata engine configuration
use crate::error::{MetadataError, Result};
use crate::formats::WriteOptions;
use cadenza_core::WalkOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub write: WriteSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScanSettings {
    /// Parser worker threads (default: num_cpus)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Files between progress reports
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Descend through symbolic links
    #[serde(default)]
    pub follow_links: bool,

    /// Skip files and directories whose name starts with a dot
    #[serde(default)]
    pub skip_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WriteSettings {
    /// Smallest padding created when metadata has to grow
    #[serde(default = "default_min_padding")]
    pub min_padding: u64,

    /// Largest padding kept or created after a rewrite
    #[serde(default = "default_max_padding")]
    pub max_padding: u64,
}

impl MetadataConfig {
    /// Load configuration from an optional TOML file and the environment
    ///
    /// A missing file is not an error. Environment variables override the
    /// file: `CADENZA__SCAN__WORKERS=4`, `CADENZA__WRITE__MAX_PADDING=0`.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("CADENZA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| MetadataError::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| MetadataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.scan.workers == 0 {
            return Err(MetadataError::Config(
                "scan.workers must be at least 1".to_string(),
            ));
        }

        if self.scan.progress_interval == 0 {
            return Err(MetadataError::Config(
                "scan.progress_interval must be at least 1".to_string(),
            ));
        }

        if self.write.min_padding > self.write.max_padding {
            return Err(MetadataError::Config(format!(
                "write.min_padding ({}) exceeds write.max_padding ({})",
                self.write.min_padding, self.write.max_padding
            )));
        }

        Ok(())
    }
}

impl ScanSettings {
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            follow_links: self.follow_links,
            skip_hidden: self.skip_hidden,
        }
    }
}

impl WriteSettings {
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            min_padding: self.min_padding,
            max_padding: self.max_padding,
        }
    }
}

// Default values
fn default_workers() -> usize {
    num_cpus::get()
}

fn default_progress_interval() -> usize {
    16
}

fn default_min_padding() -> u64 {
    1024
}

fn default_max_padding() -> u64 {
    64 * 1024
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            progress_interval: default_progress_interval(),
            follow_links: false,
            skip_hidden: false,
        }
    }
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            min_padding: default_min_padding(),
            max_padding: default_max_padding(),
        }
    }
}
