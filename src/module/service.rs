use super::device::DeviceType;
use super::driver::CsiCamera;
use crate::camera::CAMERA_API;
use crate::protocol::{encode_line, Envelope, ModuleMessage, Request, ResponseBody};
use serde_json::Map;
use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Module side of the protocol: owns the constructed cameras and answers requests
#[derive(Debug)]
pub struct ModuleService {
    device: DeviceType,
    models: Vec<String>,
    cameras: HashMap<String, CsiCamera>,
}

impl ModuleService {
    pub fn new(device: DeviceType) -> Self {
        Self {
            device,
            models: vec![device.camera_model().to_string()],
            cameras: HashMap::new(),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Answer one request
    pub fn handle(&mut self, request: Request) -> ResponseBody {
        match request {
            Request::Construct {
                name, api, model, attributes, ..
            } => {
                if api != CAMERA_API {
                    return ResponseBody::error(format!("unsupported api '{}'", api));
                }
                if !self.models.contains(&model) {
                    return ResponseBody::error(format!("unsupported model '{}'", model));
                }
                match CsiCamera::new(&name, self.device, &attributes) {
                    Ok(camera) => {
                        if self.cameras.insert(name.clone(), camera).is_some() {
                            info!("Reconfigured camera '{}'", name);
                        }
                        ResponseBody::Constructed
                    }
                    Err(e) => ResponseBody::error(e.to_string()),
                }
            }
            Request::GetImage {
                component,
                mime_type,
            } => self.with_camera(&component, |camera| {
                match camera.get_image(&mime_type) {
                    Ok(image) => ResponseBody::Image { image },
                    Err(e) => ResponseBody::error(e.to_string()),
                }
            }),
            Request::GetImages { component } => {
                self.with_camera(&component, |camera| match camera.get_images() {
                    Ok((images, metadata)) => ResponseBody::Images { images, metadata },
                    Err(e) => ResponseBody::error(e.to_string()),
                })
            }
            Request::GetProperties { component } => self.with_camera(&component, |camera| {
                ResponseBody::Properties {
                    properties: camera.properties(),
                }
            }),
            Request::DoCommand { component, .. } => self.with_camera(&component, |_| {
                warn!("do_command not implemented");
                ResponseBody::Command { result: Map::new() }
            }),
            Request::Shutdown => {
                info!("Shutdown requested, releasing {} camera(s)", self.cameras.len());
                self.cameras.clear();
                ResponseBody::Closed
            }
        }
    }

    fn with_camera<F>(&self, component: &str, f: F) -> ResponseBody
    where
        F: FnOnce(&CsiCamera) -> ResponseBody,
    {
        match self.cameras.get(component) {
            Some(camera) => f(camera),
            None => ResponseBody::error(format!("no camera named '{}'", component)),
        }
    }

    /// Announce the advertised models, then answer requests until shutdown or EOF
    pub async fn serve<R, W>(mut self, reader: R, mut writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let ready = ModuleMessage::Ready {
            models: self.models.clone(),
        };
        write_message(&mut writer, &ready).await?;
        info!("Module ready, serving models: {}", self.models.join(", "));

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Discarding malformed request: {}", e);
                    continue;
                }
            };

            let shutdown = matches!(envelope.request, Request::Shutdown);
            let body = self.handle(envelope.request);
            debug!("Request {} -> {}", envelope.id, body.kind());
            write_message(
                &mut writer,
                &ModuleMessage::Response {
                    id: envelope.id,
                    body,
                },
            )
            .await?;

            if shutdown {
                return Ok(());
            }
        }

        info!("Runtime closed the connection");
        Ok(())
    }
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ModuleMessage,
) -> io::Result<()> {
    let line = encode_line(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
