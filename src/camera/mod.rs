mod client;
mod types;

pub use client::{client_for, CameraCapability, CameraClient};
pub use types::{ImageBytes, ImageMetadata, IntrinsicParameters, PropertySet, CAMERA_API, MIME_JPEG};
