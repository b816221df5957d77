use super::CameraIdentity;
use crate::error::{BasecamError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Modified Julian Date of the Unix epoch.
const MJD_UNIX_EPOCH: f64 = 40587.0;

/// Modified Julian Date for a UTC time.
pub fn mjd(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 86_400_000.0 + MJD_UNIX_EPOCH
}

/// SDSS Julian Date: the MJD shifted so that it rolls over during the day.
pub fn sjd(time: DateTime<Utc>) -> i64 {
    (mjd(time) + 0.3).floor() as i64
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([A-Za-z_.]+)(?::([^{}]*))?\}").expect("Invalid regex pattern"))
}

fn sequence_regex() -> &'static Regex {
    static SEQUENCE: OnceLock<Regex> = OnceLock::new();
    SEQUENCE.get_or_init(|| Regex::new(r"\{num(?::([^{}]*))?\}").expect("Invalid regex pattern"))
}

/// Creates sequential file names for images.
///
/// The basename must contain a `{num}` placeholder (optionally with a width,
/// `{num:04}`). Both basename and dirname can use `{camera.name}` and
/// `{camera.uid}`; the dirname can also use `{mjd}`, `{sjd}` and
/// `{date:<strftime format>}`.
#[derive(Debug, Clone)]
pub struct ImageNamer {
    basename: String,
    dirname: String,
    overwrite: bool,
    reset_sequence: bool,
    camera: Option<CameraIdentity>,
    last_num: u32,
    previous_dirname: Option<PathBuf>,
}

impl ImageNamer {
    pub fn new(basename: &str, dirname: &str, overwrite: bool, reset_sequence: bool) -> Result<Self> {
        if !sequence_regex().is_match(basename) {
            return Err(BasecamError::system(format!(
                "invalid basename {}: missing {{num}} placeholder",
                basename
            )));
        }

        Ok(Self {
            basename: basename.to_string(),
            dirname: dirname.to_string(),
            overwrite,
            reset_sequence,
            camera: None,
            last_num: 0,
            previous_dirname: None,
        })
    }

    pub fn with_camera(mut self, camera: CameraIdentity) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn last_num(&self) -> u32 {
        self.last_num
    }

    /// Evaluate the directory template for the current time.
    pub fn get_dirname(&mut self) -> Result<PathBuf> {
        let camera = self.camera.clone();
        self.dirname_at(camera.as_ref(), Utc::now())
    }

    fn dirname_at(&mut self, camera: Option<&CameraIdentity>, now: DateTime<Utc>) -> Result<PathBuf> {
        let dirname = PathBuf::from(expand(&self.dirname, camera, Some(now))?);

        if let Some(previous) = &self.previous_dirname {
            if *previous != dirname && self.reset_sequence {
                debug!("Directory changed to {}, resetting sequence", dirname.display());
                self.last_num = 0;
            }
        }
        self.previous_dirname = Some(dirname.clone());
        Ok(dirname)
    }

    /// Next path in the sequence.
    pub async fn next_path(&mut self, camera: Option<&CameraIdentity>) -> Result<PathBuf> {
        self.name(camera, true, None).await
    }

    /// Build a path. `num` forces the sequence number; with `update_num`
    /// the sequence advances to it.
    pub async fn name(
        &mut self,
        camera: Option<&CameraIdentity>,
        update_num: bool,
        num: Option<u32>,
    ) -> Result<PathBuf> {
        self.name_at(camera, update_num, num, Utc::now()).await
    }

    async fn name_at(
        &mut self,
        camera: Option<&CameraIdentity>,
        update_num: bool,
        num: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let camera = camera.cloned().or_else(|| self.camera.clone());
        let basename = expand(&self.basename, camera.as_ref(), None)?;
        let dirname = self.dirname_at(camera.as_ref(), now)?;

        let num = match num {
            Some(num) => num,
            None => self.next_num(&dirname, &basename).await?,
        };

        let path = dirname.join(format_sequence(&basename, num));
        if update_num {
            self.last_num = num;
        }
        Ok(path)
    }

    async fn next_num(&self, dirname: &Path, basename: &str) -> Result<u32> {
        if self.overwrite {
            return Ok(self.last_num + 1);
        }

        let mut pattern = String::from("^");
        let mut last = 0;
        for found in sequence_regex().find_iter(basename) {
            pattern.push_str(&regex::escape(&basename[last..found.start()]));
            pattern.push_str("([0-9]+)");
            last = found.end();
        }
        pattern.push_str(&regex::escape(&basename[last..]));
        pattern.push('$');
        let regex = Regex::new(&pattern)
            .map_err(|e| BasecamError::system(format!("invalid basename pattern: {}", e)))?;

        let mut entries = match tokio::fs::read_dir(dirname).await {
            Ok(entries) => entries,
            Err(_) => return Ok(self.last_num + 1),
        };

        let mut max: Option<u32> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let found = regex
                .captures(&name)
                .and_then(|captures| captures[1].parse::<u32>().ok());
            if let Some(num) = found {
                max = Some(max.map_or(num, |max| max.max(num)));
            }
        }

        Ok(match max {
            Some(max) => max + 1,
            None => self.last_num + 1,
        })
    }
}

/// Fill every placeholder except `{num}`.
fn expand(
    template: &str,
    camera: Option<&CameraIdentity>,
    now: Option<DateTime<Utc>>,
) -> Result<String> {
    let mut error = None;
    let expanded = placeholder_regex().replace_all(template, |captures: &regex::Captures<'_>| {
        let key = &captures[1];
        let spec = captures.get(2).map(|m| m.as_str());
        let value = match (key, camera, now) {
            ("num", _, _) => Some(captures[0].to_string()),
            ("camera.name", Some(camera), _) => Some(camera.name.clone()),
            ("camera.uid", Some(camera), _) => {
                Some(camera.uid.clone().unwrap_or_else(|| "NA".to_string()))
            }
            ("mjd", _, Some(now)) => Some((mjd(now).floor() as i64).to_string()),
            ("sjd", _, Some(now)) => Some(sjd(now).to_string()),
            ("date", _, Some(now)) => Some(now.format(spec.unwrap_or("%Y-%m-%d")).to_string()),
            _ => None,
        };
        value.unwrap_or_else(|| {
            error.get_or_insert_with(|| captures[0].to_string());
            String::new()
        })
    });

    match error {
        Some(placeholder) => Err(BasecamError::system(format!(
            "cannot expand placeholder {} in {}",
            placeholder, template
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// Replace `{num}` / `{num:0N}` with the sequence number.
fn format_sequence(basename: &str, num: u32) -> String {
    sequence_regex()
        .replace_all(basename, |captures: &regex::Captures<'_>| {
            let spec = captures
                .get(1)
                .map(|m| m.as_str().trim_end_matches('d'))
                .unwrap_or("");
            let width = spec.trim_start_matches('0').parse::<usize>().unwrap_or(0);
            if spec.starts_with('0') {
                format!("{:0width$}", num, width = width)
            } else {
                format!("{:width$}", num, width = width)
            }
        })
        .into_owned()
}
