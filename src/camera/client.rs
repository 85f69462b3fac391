use super::types::{ImageBytes, ImageMetadata, PropertySet, CAMERA_API};
use crate::error::{CallError, HarnessError, Result};
use crate::protocol::{Request, ResponseBody};
use crate::runtime::{ModuleProcess, RuntimeInstance};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Weak;
use tracing::{debug, trace};

/// Read-only camera operations, independent of how they are transported
#[async_trait]
pub trait CameraCapability: Send + Sync {
    async fn fetch_image(&self, mime_hint: &str) -> std::result::Result<ImageBytes, CallError>;

    async fn fetch_images(
        &self,
    ) -> std::result::Result<(Vec<ImageBytes>, ImageMetadata), CallError>;

    async fn fetch_properties(&self) -> std::result::Result<PropertySet, CallError>;
}

/// Handle to one camera component of a runtime instance.
///
/// Holds only a weak reference to the backing module, so calls made after
/// the instance is closed fail with `CallError::RuntimeClosed`.
#[derive(Debug, Clone)]
pub struct CameraClient {
    name: String,
    model: String,
    module: Weak<ModuleProcess>,
}

/// Look up `component_name` in `instance` and bind a camera client to it
pub fn client_for(instance: &RuntimeInstance, component_name: &str) -> Result<CameraClient> {
    if instance.is_closed() {
        return Err(HarnessError::lookup(
            component_name,
            "runtime instance is closed",
        ));
    }

    let component = instance.component(component_name).ok_or_else(|| {
        HarnessError::lookup(
            component_name.to_string(),
            format!(
                "no such component (configured: {})",
                instance.component_names().join(", ")
            ),
        )
    })?;

    if component.api != CAMERA_API {
        return Err(HarnessError::lookup(
            component_name.to_string(),
            format!("component implements '{}', not a camera", component.api),
        ));
    }

    debug!("Created camera client for '{}'", component_name);
    Ok(CameraClient {
        name: component_name.to_string(),
        model: component.model.clone(),
        module: component.module.clone(),
    })
}

impl RuntimeInstance {
    /// Shorthand for [`client_for`]
    pub fn camera(&self, component_name: &str) -> Result<CameraClient> {
        client_for(self, component_name)
    }
}

impl CameraClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Pass an opaque command through to the driver
    pub async fn do_command(
        &self,
        command: Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, CallError> {
        match self
            .call(Request::DoCommand {
                component: self.name.clone(),
                command,
            })
            .await?
        {
            ResponseBody::Command { result } => Ok(result),
            other => Err(unexpected("command", &other)),
        }
    }

    async fn call(&self, request: Request) -> std::result::Result<ResponseBody, CallError> {
        let module = self.module.upgrade().ok_or(CallError::RuntimeClosed)?;
        trace!("Calling '{}' on module '{}'", self.name, module.name());
        match module.call(request).await? {
            ResponseBody::Error { message } => Err(CallError::Driver(message)),
            body => Ok(body),
        }
    }
}

#[async_trait]
impl CameraCapability for CameraClient {
    async fn fetch_image(&self, mime_hint: &str) -> std::result::Result<ImageBytes, CallError> {
        match self
            .call(Request::GetImage {
                component: self.name.clone(),
                mime_type: mime_hint.to_string(),
            })
            .await?
        {
            ResponseBody::Image { image } => Ok(image),
            other => Err(unexpected("image", &other)),
        }
    }

    async fn fetch_images(
        &self,
    ) -> std::result::Result<(Vec<ImageBytes>, ImageMetadata), CallError> {
        match self
            .call(Request::GetImages {
                component: self.name.clone(),
            })
            .await?
        {
            ResponseBody::Images { images, metadata } => Ok((images, metadata)),
            other => Err(unexpected("images", &other)),
        }
    }

    async fn fetch_properties(&self) -> std::result::Result<PropertySet, CallError> {
        match self
            .call(Request::GetProperties {
                component: self.name.clone(),
            })
            .await?
        {
            ResponseBody::Properties { properties } => Ok(properties),
            other => Err(unexpected("properties", &other)),
        }
    }
}

fn unexpected(expected: &str, body: &ResponseBody) -> CallError {
    CallError::UnexpectedResponse(format!("expected '{}', got '{}'", expected, body.kind()))
}
