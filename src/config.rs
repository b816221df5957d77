use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BasecamConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub exposure: ExposureConfig,
    /// Known cameras, keyed by camera name
    #[serde(default)]
    pub cameras: BTreeMap<String, CameraEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Interval between camera discovery polls, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,

    /// Start the discovery poller when the system starts
    #[serde(default = "default_poll_on_start")]
    pub poll_on_start: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExposureConfig {
    /// Directory template for images
    #[serde(default = "default_exposure_directory")]
    pub directory: String,

    /// File name template; must contain a `{num}` placeholder
    #[serde(default = "default_exposure_basename")]
    pub basename: String,

    /// Restart numbering instead of skipping existing files
    #[serde(default)]
    pub overwrite: bool,

    /// Add DATASUM and CHECKSUM cards to written files
    #[serde(default = "default_checksum")]
    pub checksum: bool,

    /// Retry once if writing an image fails
    #[serde(default = "default_write_retry")]
    pub write_retry: bool,

    /// Reset the sequence number when the directory changes
    #[serde(default = "default_reset_sequence")]
    pub reset_sequence: bool,
}

/// Configuration of a single camera
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CameraEntry {
    /// Unique identifier reported by the vendor SDK (serial or device id)
    pub uid: String,

    /// Connect as soon as the camera is added
    #[serde(default)]
    pub autoconnect: bool,

    /// Whether the camera has a shutter
    #[serde(default)]
    pub shutter: bool,

    /// Whether the firmware handles the shutter during exposures
    #[serde(default = "default_auto_shutter")]
    pub auto_shutter: bool,

    /// Parameters passed to the driver when connecting
    #[serde(default)]
    pub connection_params: HashMap<String, String>,
}

impl BasecamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("basecam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("system.poll_interval_seconds", default_poll_interval())?
            .set_default("system.poll_on_start", default_poll_on_start())?
            .set_default("exposure.directory", default_exposure_directory())?
            .set_default("exposure.basename", default_exposure_basename())?
            .set_default("exposure.overwrite", false)?
            .set_default("exposure.checksum", default_checksum())?
            .set_default("exposure.write_retry", default_write_retry())?
            .set_default("exposure.reset_sequence", default_reset_sequence())?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("BASECAM").separator("__"))
            .build()?;

        let config: BasecamConfig = settings.try_deserialize()?;

        info!(
            "Configuration loaded with {} camera(s)",
            config.cameras.len()
        );
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        settings.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.system.poll_interval_seconds > 0.0) {
            return Err(ConfigError::Message(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if !basename_has_sequence(&self.exposure.basename) {
            return Err(ConfigError::Message(format!(
                "Exposure basename '{}' must contain a {{num}} placeholder",
                self.exposure.basename
            )));
        }

        let mut uids = HashSet::new();
        for (name, camera) in &self.cameras {
            if camera.uid.is_empty() {
                return Err(ConfigError::Message(format!(
                    "Camera '{}' has an empty uid",
                    name
                )));
            }
            if !uids.insert(camera.uid.as_str()) {
                return Err(ConfigError::Message(format!(
                    "Repeated uid '{}' in the camera configuration",
                    camera.uid
                )));
            }
        }

        Ok(())
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            poll_on_start: default_poll_on_start(),
        }
    }
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            directory: default_exposure_directory(),
            basename: default_exposure_basename(),
            overwrite: false,
            checksum: default_checksum(),
            write_retry: default_write_retry(),
            reset_sequence: default_reset_sequence(),
        }
    }
}

pub(crate) fn basename_has_sequence(basename: &str) -> bool {
    basename.contains("{num}") || basename.contains("{num:")
}

// Default value functions
fn default_poll_interval() -> f64 {
    1.0
}
fn default_poll_on_start() -> bool {
    false
}
fn default_exposure_directory() -> String {
    ".".to_string()
}
fn default_exposure_basename() -> String {
    "{camera.name}-{num:04}.fits".to_string()
}
fn default_checksum() -> bool {
    true
}
fn default_write_retry() -> bool {
    true
}
fn default_reset_sequence() -> bool {
    true
}
fn default_auto_shutter() -> bool {
    true
}
