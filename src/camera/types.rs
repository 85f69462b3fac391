use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API identifier of the camera capability
pub const CAMERA_API: &str = "rdk:component:camera";

pub const MIME_JPEG: &str = "image/jpeg";

/// Encoded image returned by a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBytes {
    pub mime_type: String,
    /// Empty for single-source cameras
    #[serde(default)]
    pub source_name: String,
    pub bytes: Vec<u8>,
}

impl ImageBytes {
    pub fn new<S: Into<String>>(mime_type: S, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            source_name: String::new(),
            bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Metadata accompanying a batch of images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrinsicParameters {
    pub width_px: u32,
    pub height_px: u32,
}

/// Static driver metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    pub supports_pcd: bool,
    pub intrinsics: Option<IntrinsicParameters>,
    #[serde(default)]
    pub mime_types: Vec<String>,
    pub frame_rate: Option<f32>,
}
