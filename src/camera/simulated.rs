use super::backend::{
    Area, CameraBackend, CameraFactory, CameraNotifier, CameraParams, CameraStatus, Cooler,
    ImageArea, Shutter,
};
use crate::error::{BasecamError, Result};
use crate::events::CameraEvent;
use crate::exposure::{Exposure, ImageData, ImageType};
use crate::sdk::SimulatedSystem;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_WIDTH: u32 = 64;
pub const DEFAULT_HEIGHT: u32 = 48;
pub const AMBIENT_TEMPERATURE: f64 = 20.0;

/// Counts per second of integration for flats and object frames.
const SIGNAL_RATE: f64 = 1000.0;

/// An in-process camera attached to a [`SimulatedSystem`].
///
/// Frames are uniform: zero for bias and dark frames, otherwise
/// proportional to the exposure time. The sensor temperature moves towards
/// the set point by at most `cooling_step` degrees on every read.
pub struct SimulatedCamera {
    uid: Option<String>,
    system: Arc<SimulatedSystem>,
    notifier: Option<CameraNotifier>,
    connected: bool,
    width: u32,
    height: u32,
    area: Option<Area>,
    binning: (u32, u32),
    shutter_open: bool,
    temperature: f64,
    set_point: Option<f64>,
    pub cooling_step: f64,
}

impl SimulatedCamera {
    pub fn new(uid: Option<&str>, system: Arc<SimulatedSystem>) -> Self {
        Self {
            uid: uid.map(str::to_string),
            system,
            notifier: None,
            connected: false,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            area: None,
            binning: (1, 1),
            shutter_open: false,
            temperature: AMBIENT_TEMPERATURE,
            set_point: None,
            cooling_step: 5.0,
        }
    }

    fn notify(&self, event: CameraEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event);
        }
    }

    fn full_frame(&self) -> Area {
        (1, self.width, 1, self.height)
    }

    fn parse_dimension(params: &HashMap<String, String>, key: &str, default: u32) -> Result<u32> {
        match params.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| {
                    BasecamError::connection("simulated", format!("invalid {} {:?}", key, value))
                }),
        }
    }
}

#[async_trait]
impl CameraBackend for SimulatedCamera {
    async fn connect(&mut self, params: &HashMap<String, String>) -> Result<()> {
        let uid = self
            .uid
            .clone()
            .ok_or_else(|| BasecamError::connection("simulated", "no device uid to connect to"))?;

        if !self.system.is_attached(&uid) {
            return Err(BasecamError::connection(
                uid.as_str(),
                "device is not attached",
            ));
        }

        self.width = Self::parse_dimension(params, "width", self.width)?;
        self.height = Self::parse_dimension(params, "height", self.height)?;
        self.connected = true;
        debug!("Simulated camera {} connected ({}x{})", uid, self.width, self.height);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn expose(&mut self, exposure: &mut Exposure) -> Result<()> {
        if !self.connected {
            return Err(BasecamError::exposure(
                self.uid.clone().unwrap_or_default(),
                "camera is not connected",
            ));
        }

        self.notify(CameraEvent::ExposureFlushing);
        exposure.set_obstime(Utc::now());
        self.notify(CameraEvent::ExposureIntegrating);

        let (x0, x1, y0, y1) = self.area.unwrap_or_else(|| self.full_frame());
        let (hbin, vbin) = self.binning;
        let width = ((x1 - x0 + 1) / hbin).max(1) as usize;
        let height = ((y1 - y0 + 1) / vbin).max(1) as usize;

        let exptime = exposure.exptime.unwrap_or(0.0);
        let level = match exposure.image_type {
            Some(ImageType::Bias) | Some(ImageType::Dark) => 0.0,
            _ => (exptime * SIGNAL_RATE * (hbin * vbin) as f64).min(u16::MAX as f64),
        };

        self.notify(CameraEvent::ExposureReading);
        exposure.data = Some(ImageData::filled(width, height, level.round() as u16));
        Ok(())
    }

    async fn status(&mut self) -> Result<CameraStatus> {
        let mut status = CameraStatus::new();
        status.insert("connected".to_string(), json!(self.connected));
        status.insert("temperature".to_string(), json!(self.temperature));
        status.insert("set_point".to_string(), json!(self.set_point));
        status.insert("shutter_open".to_string(), json!(self.shutter_open));
        status.insert("binning".to_string(), json!([self.binning.0, self.binning.1]));
        Ok(status)
    }

    fn uid(&self) -> Option<String> {
        if self.connected {
            self.uid.clone()
        } else {
            None
        }
    }

    fn attach_notifier(&mut self, notifier: CameraNotifier) {
        self.notifier = Some(notifier);
    }

    fn shutter(&mut self) -> Option<&mut dyn Shutter> {
        Some(self)
    }

    fn cooler(&mut self) -> Option<&mut dyn Cooler> {
        Some(self)
    }

    fn image_area(&mut self) -> Option<&mut dyn ImageArea> {
        Some(self)
    }
}

#[async_trait]
impl Shutter for SimulatedCamera {
    async fn set_shutter(&mut self, open: bool) -> Result<()> {
        self.shutter_open = open;
        Ok(())
    }

    async fn get_shutter(&mut self) -> Result<bool> {
        Ok(self.shutter_open)
    }
}

#[async_trait]
impl Cooler for SimulatedCamera {
    async fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        self.set_point = Some(temperature);
        Ok(())
    }

    async fn get_temperature(&mut self) -> Result<f64> {
        if let Some(target) = self.set_point {
            let delta = (target - self.temperature).clamp(-self.cooling_step, self.cooling_step);
            self.temperature += delta;
        }
        Ok(self.temperature)
    }
}

#[async_trait]
impl ImageArea for SimulatedCamera {
    async fn get_image_area(&mut self) -> Result<Area> {
        Ok(self.area.unwrap_or_else(|| self.full_frame()))
    }

    async fn set_image_area(&mut self, area: Option<Area>) -> Result<()> {
        if let Some((_, x1, _, y1)) = area {
            if x1 > self.width || y1 > self.height {
                return Err(BasecamError::camera(
                    self.uid.clone().unwrap_or_default(),
                    "image area outside of the sensor",
                ));
            }
        }
        self.area = area;
        Ok(())
    }

    async fn get_binning(&mut self) -> Result<(u32, u32)> {
        Ok(self.binning)
    }

    async fn set_binning(&mut self, hbin: u32, vbin: u32) -> Result<()> {
        self.binning = (hbin, vbin);
        Ok(())
    }
}

/// Creates [`SimulatedCamera`] backends for a [`SimulatedSystem`].
pub struct SimulatedFactory {
    system: Arc<SimulatedSystem>,
}

impl SimulatedFactory {
    pub fn new(system: Arc<SimulatedSystem>) -> Self {
        Self { system }
    }
}

impl CameraFactory for SimulatedFactory {
    fn create(&self, params: &CameraParams) -> Result<Box<dyn CameraBackend>> {
        Ok(Box::new(SimulatedCamera::new(
            params.uid.as_deref(),
            Arc::clone(&self.system),
        )))
    }
}
