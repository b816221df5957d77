mod namer;

pub use namer::{mjd, sjd, ImageNamer};

use crate::error::{BasecamError, Result};
use crate::fits::{self, Context, FitsModel, Hdu};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Seconds TAI is ahead of UTC.
pub const TAI_UTC_OFFSET_SECONDS: i64 = 37;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Bias,
    Dark,
    Flat,
    Object,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Bias => "bias",
            ImageType::Dark => "dark",
            ImageType::Flat => "flat",
            ImageType::Object => "object",
        }
    }

    /// Whether the shutter stays closed for this image type.
    pub fn is_dark(&self) -> bool {
        matches!(self, ImageType::Bias | ImageType::Dark)
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = BasecamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bias" => Ok(ImageType::Bias),
            "dark" => Ok(ImageType::Dark),
            "flat" => Ok(ImageType::Flat),
            "object" => Ok(ImageType::Object),
            other => Err(BasecamError::system(format!("invalid image type {}", other))),
        }
    }
}

/// A 2D unsigned 16-bit image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u16>,
}

impl ImageData {
    pub fn new(width: usize, height: usize, pixels: Vec<u16>) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(BasecamError::system(format!(
                "image of {}x{} needs {} pixels, got {}",
                width,
                height,
                width * height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: usize, height: usize, value: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&p| p as f64).sum::<f64>() / self.pixels.len() as f64
    }
}

/// The camera that took an exposure, as seen by the data model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraIdentity {
    pub name: String,
    pub uid: Option<String>,
    /// Version of the camera library.
    pub version: Option<String>,
}

/// Options for [`Exposure::write`].
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub overwrite: bool,
    pub checksum: bool,
    pub retry: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            checksum: true,
            retry: true,
        }
    }
}

/// An image and its metadata.
#[derive(Debug, Clone)]
pub struct Exposure {
    pub camera: Option<CameraIdentity>,
    pub filename: Option<PathBuf>,
    pub data: Option<ImageData>,
    pub fits_model: Option<FitsModel>,
    /// Exposure time of a single integration, in seconds.
    pub exptime: Option<f64>,
    /// Total exposure time, in seconds.
    pub exptime_n: Option<f64>,
    pub stack: u32,
    pub stack_function: Option<String>,
    pub image_type: Option<ImageType>,
    obstime: DateTime<Utc>,
    extra_hdus: Vec<(Hdu, Option<usize>)>,
}

impl Exposure {
    pub fn new(camera: Option<CameraIdentity>, fits_model: Option<FitsModel>) -> Self {
        Self {
            camera,
            filename: None,
            data: None,
            fits_model,
            exptime: None,
            exptime_n: None,
            stack: 1,
            stack_function: None,
            image_type: None,
            obstime: Utc::now(),
            extra_hdus: Vec::new(),
        }
    }

    fn camera_name(&self) -> &str {
        self.camera
            .as_ref()
            .map(|camera| camera.name.as_str())
            .unwrap_or("unknown")
    }

    /// Start of the observation, in UTC.
    pub fn obstime(&self) -> DateTime<Utc> {
        self.obstime
    }

    pub fn set_obstime(&mut self, obstime: DateTime<Utc>) {
        self.obstime = obstime;
    }

    /// Set the observation time from an ISO string. Times without an offset
    /// are taken as UTC.
    pub fn set_obstime_iso(&mut self, value: &str) -> Result<()> {
        let value = value.trim();
        if let Ok(obstime) = DateTime::parse_from_rfc3339(value) {
            self.obstime = obstime.with_timezone(&Utc);
            return Ok(());
        }

        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d"] {
            let parsed = if format == "%Y-%m-%d" {
                chrono::NaiveDate::parse_from_str(value, format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            } else {
                NaiveDateTime::parse_from_str(value, format).ok()
            };
            if let Some(naive) = parsed {
                self.obstime = naive.and_utc();
                return Ok(());
            }
        }

        Err(BasecamError::exposure(
            self.camera_name(),
            format!("invalid obstime {}", value),
        ))
    }

    /// Observation time in ISO format (UTC).
    pub fn obstime_isot(&self) -> String {
        self.obstime.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    }

    /// Observation time in ISO format (TAI).
    pub fn obstime_tai_isot(&self) -> String {
        (self.obstime + ChronoDuration::seconds(TAI_UTC_OFFSET_SECONDS))
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string()
    }

    /// Add an HDU to the output. Extra HDUs are inserted after the model is
    /// evaluated; `None` appends. The primary HDU always stays first.
    pub fn add_hdu(&mut self, hdu: Hdu, index: Option<usize>) {
        self.extra_hdus.push((hdu, index));
    }

    /// Evaluate the FITS model (or the default one) and add the extra HDUs.
    pub fn to_hdus(&self, context: &Context) -> Result<Vec<Hdu>> {
        let mut hdus = match &self.fits_model {
            Some(model) => model.to_hdus(self, context)?,
            None => FitsModel::default().to_hdus(self, context)?,
        };

        for (hdu, index) in &self.extra_hdus {
            match index {
                Some(index) => {
                    let index = (*index).clamp(1, hdus.len());
                    hdus.insert(index, hdu.clone());
                }
                None => hdus.push(hdu.clone()),
            }
        }
        Ok(hdus)
    }

    /// Write the exposure to disk and return the evaluated HDUs.
    ///
    /// Names ending in `.gz` are compressed with `gzip -1`.
    pub async fn write(
        &self,
        filename: Option<&Path>,
        context: &Context,
        options: WriteOptions,
    ) -> Result<Vec<Hdu>> {
        let path = filename
            .map(Path::to_path_buf)
            .or_else(|| self.filename.clone())
            .ok_or_else(|| BasecamError::exposure(self.camera_name(), "filename not set"))?;

        let hdus = self.to_hdus(context)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        if !options.overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BasecamError::exposure(
                self.camera_name(),
                format!("file {} already exists", path.display()),
            ));
        }

        let bytes = fits::encode_hdus(&hdus, options.checksum);
        write_with_retry(self.camera_name(), options.retry, || write_bytes(&path, &bytes)).await?;

        debug!("Wrote exposure to {}", path.display());
        Ok(hdus)
    }
}

/// Run `write`, trying a second time if it fails and `retry` is set.
async fn write_with_retry<F, Fut>(camera: &str, retry: bool, mut write: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut retried = false;
    loop {
        match write().await {
            Ok(()) => return Ok(()),
            Err(e) if retry && !retried => {
                warn!(camera, "Retrying after exposure writing failed with error: {}", e);
                retried = true;
            }
            Err(e) => {
                return Err(BasecamError::exposure(
                    camera,
                    format!("failed writing exposure to disk: {}", e),
                ));
            }
        }
    }
}

async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let is_gzip = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    if !is_gzip {
        tokio::fs::write(path, bytes).await?;
        return Ok(());
    }

    // Compress in a local temporary file, then move it into place.
    let temp = std::env::temp_dir().join(format!("basecam-{}.fits", Uuid::new_v4()));
    tokio::fs::write(&temp, bytes).await?;
    gzip(&temp, 1).await?;

    let compressed = PathBuf::from(format!("{}.gz", temp.display()));
    move_file(&compressed, path).await
}

/// Compress a file in place with the system `gzip`.
pub async fn gzip(path: &Path, level: u32) -> Result<()> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(BasecamError::not_found(format!("file {}", path.display())));
    }

    let output = Command::new("gzip")
        .arg(format!("-{}", level))
        .arg("-f")
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(BasecamError::system(format!(
            "failed compressing file {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Rename, falling back to copy and delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
