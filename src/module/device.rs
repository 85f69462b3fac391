use std::path::Path;
use tracing::debug;

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";

/// Board family the module is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    RaspberryPi,
    Jetson,
    Unknown,
}

impl DeviceType {
    /// Detect the board from the device tree
    pub fn detect() -> Self {
        Self::detect_from(Path::new(DEVICE_TREE_MODEL))
    }

    pub fn detect_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(model) => Self::from_model_string(&model),
            Err(e) => {
                debug!("Cannot read {}: {}", path.display(), e);
                Self::Unknown
            }
        }
    }

    pub fn from_model_string(model: &str) -> Self {
        let model = model.trim_end_matches('\0').to_lowercase();
        if model.contains("raspberry pi") {
            Self::RaspberryPi
        } else if model.contains("jetson") || model.contains("nvidia") {
            Self::Jetson
        } else {
            Self::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RaspberryPi => "Raspberry Pi",
            Self::Jetson => "Jetson",
            Self::Unknown => "Unknown",
        }
    }

    /// Camera model this module registers on the device.
    /// Unknown boards get the Pi model, which runs on plain libcamera/V4L2.
    pub fn camera_model(&self) -> &'static str {
        match self {
            Self::Jetson => "viam:camera:csi",
            Self::RaspberryPi | Self::Unknown => "viam:camera:csi-pi",
        }
    }

    /// GStreamer source element used for the sensor
    pub(crate) fn source_element(&self) -> &'static str {
        match self {
            Self::Jetson => "nvarguscamerasrc",
            Self::RaspberryPi => "libcamerasrc",
            Self::Unknown => "v4l2src",
        }
    }
}
