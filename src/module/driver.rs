use super::device::DeviceType;
use crate::camera::{ImageBytes, ImageMetadata, IntrinsicParameters, PropertySet, MIME_JPEG};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("no bytes retrieved from capture device")]
    NoFrame,
}

/// Attribute values after defaults have been applied
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub width_px: u32,
    pub height_px: u32,
    pub frame_rate: u32,
    pub video_path: String,
    /// Simulated time for the capture device to open
    pub warmup: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            width_px: 1920,
            height_px: 1080,
            frame_rate: 30,
            video_path: "0".to_string(),
            warmup: Duration::from_millis(300),
        }
    }
}

impl DriverSettings {
    pub fn from_attributes(attributes: &Map<String, Value>) -> Result<Self, DriverError> {
        let defaults = Self::default();
        Ok(Self {
            width_px: positive(attributes, "width_px", defaults.width_px)?,
            height_px: positive(attributes, "height_px", defaults.height_px)?,
            frame_rate: positive(attributes, "frame_rate", defaults.frame_rate)?,
            video_path: string(attributes, "video_path", defaults.video_path)?,
            warmup: Duration::from_millis(non_negative(
                attributes,
                "warmup_ms",
                defaults.warmup.as_millis() as u64,
            )?),
        })
    }
}

fn number(attributes: &Map<String, Value>, name: &str) -> Result<Option<f64>, DriverError> {
    match attributes.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| DriverError::InvalidAttribute {
                name: name.to_string(),
                reason: format!("expected a number, got {}", value),
            }),
    }
}

fn positive(attributes: &Map<String, Value>, name: &str, default: u32) -> Result<u32, DriverError> {
    match number(attributes, name)? {
        None => Ok(default),
        Some(v) if v >= 1.0 && v <= u32::MAX as f64 => Ok(v as u32),
        Some(v) => Err(DriverError::InvalidAttribute {
            name: name.to_string(),
            reason: format!("must be a positive integer, got {}", v),
        }),
    }
}

fn non_negative(
    attributes: &Map<String, Value>,
    name: &str,
    default: u64,
) -> Result<u64, DriverError> {
    match number(attributes, name)? {
        None => Ok(default),
        Some(v) if v >= 0.0 => Ok(v as u64),
        Some(v) => Err(DriverError::InvalidAttribute {
            name: name.to_string(),
            reason: format!("must not be negative, got {}", v),
        }),
    }
}

fn string(
    attributes: &Map<String, Value>,
    name: &str,
    default: String,
) -> Result<String, DriverError> {
    match attributes.get(name) {
        None => Ok(default),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DriverError::InvalidAttribute {
            name: name.to_string(),
            reason: format!("expected a string, got {}", other),
        }),
    }
}

/// Simulated CSI sensor producing MJPEG-framed buffers
#[derive(Debug)]
pub struct CsiCamera {
    name: String,
    device: DeviceType,
    settings: DriverSettings,
    ready_at: Instant,
    frame_counter: AtomicU64,
}

impl CsiCamera {
    pub fn new(
        name: &str,
        device: DeviceType,
        attributes: &Map<String, Value>,
    ) -> Result<Self, DriverError> {
        let settings = DriverSettings::from_attributes(attributes)?;

        info!(
            "Initializing CSI camera '{}' on {} ({}x{} @ {}fps)",
            name,
            device.name(),
            settings.width_px,
            settings.height_px,
            settings.frame_rate
        );

        let camera = Self {
            name: name.to_string(),
            device,
            ready_at: Instant::now() + settings.warmup,
            settings,
            frame_counter: AtomicU64::new(0),
        };
        debug!("pipeline: {}", camera.pipeline_description());

        Ok(camera)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// GStreamer pipeline a hardware build would launch for these settings
    pub fn pipeline_description(&self) -> String {
        let DriverSettings {
            width_px,
            height_px,
            frame_rate,
            video_path,
            ..
        } = &self.settings;

        let source = match self.device {
            DeviceType::Jetson => format!("{} sensor-id={}", self.device.source_element(), video_path),
            DeviceType::RaspberryPi => self.device.source_element().to_string(),
            DeviceType::Unknown => {
                format!("{} device=/dev/video{}", self.device.source_element(), video_path)
            }
        };

        format!(
            "{} ! video/x-raw,width={},height={},framerate={}/1 ! \
             jpegenc ! image/jpeg ! appsink name=appsink0 max-buffers=1 drop=true",
            source, width_px, height_px, frame_rate
        )
    }

    pub fn is_ready(&self) -> bool {
        Instant::now() >= self.ready_at
    }

    /// Latest frame as JPEG; the hint is logged but every frame is JPEG
    pub fn get_image(&self, mime_hint: &str) -> Result<ImageBytes, DriverError> {
        if !mime_hint.is_empty() && mime_hint != MIME_JPEG {
            debug!("Ignoring mime hint '{}', serving {}", mime_hint, MIME_JPEG);
        }

        let bytes = self.capture_frame();
        if bytes.is_empty() {
            return Err(DriverError::NoFrame);
        }
        Ok(ImageBytes::new(MIME_JPEG, bytes))
    }

    /// Single-source collection stamped with the capture time
    pub fn get_images(&self) -> Result<(Vec<ImageBytes>, ImageMetadata), DriverError> {
        let image = self.get_image(MIME_JPEG)?;
        let metadata = ImageMetadata {
            captured_at: chrono::Utc::now(),
        };
        Ok((vec![image], metadata))
    }

    pub fn properties(&self) -> PropertySet {
        PropertySet {
            supports_pcd: false,
            intrinsics: Some(IntrinsicParameters {
                width_px: self.settings.width_px,
                height_px: self.settings.height_px,
            }),
            mime_types: vec![MIME_JPEG.to_string()],
            frame_rate: Some(self.settings.frame_rate as f32),
        }
    }

    /// Empty until the simulated device has opened
    fn capture_frame(&self) -> Vec<u8> {
        if !self.is_ready() {
            return Vec::new();
        }

        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);

        // JFIF header
        let mut data = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x01,
            0x00, 0x48, 0x00, 0x48, 0x00, 0x00,
        ];

        let pattern_size = 1000 + (frame_id % 500) as usize;
        let pattern_byte = (frame_id % 256) as u8;
        data.extend(vec![pattern_byte; pattern_size]);
        data.extend_from_slice(&[0xFF, 0xD9]);

        trace!(
            "Captured frame {} for '{}' ({}x{}, {} bytes)",
            frame_id,
            self.name,
            self.settings.width_px,
            self.settings.height_px,
            data.len()
        );
        data
    }
}
