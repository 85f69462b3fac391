//! Line-delimited JSON spoken between the runtime and a module subprocess.
//!
//! The module announces itself with a single `ready` line on stdout, then
//! answers each request read from stdin with a `response` carrying the same
//! id. Responses may arrive in any order.

use crate::camera::{ImageBytes, ImageMetadata, PropertySet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Construct {
        name: String,
        api: String,
        model: String,
        #[serde(default)]
        attributes: Map<String, Value>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    GetImage {
        component: String,
        mime_type: String,
    },
    GetImages {
        component: String,
    },
    GetProperties {
        component: String,
    },
    DoCommand {
        component: String,
        command: Map<String, Value>,
    },
    Shutdown,
}

/// A request tagged with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleMessage {
    /// Handshake listing the models this module can construct
    Ready { models: Vec<String> },
    Response { id: u64, body: ResponseBody },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    Constructed,
    Image {
        image: ImageBytes,
    },
    Images {
        images: Vec<ImageBytes>,
        metadata: ImageMetadata,
    },
    Properties {
        properties: PropertySet,
    },
    Command {
        result: Map<String, Value>,
    },
    Closed,
    Error {
        message: String,
    },
}

impl ResponseBody {
    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Short name used in logs and unexpected-response errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Image { .. } => "image",
            Self::Images { .. } => "images",
            Self::Properties { .. } => "properties",
            Self::Command { .. } => "command",
            Self::Closed => "closed",
            Self::Error { .. } => "error",
        }
    }
}

/// Serialize a message as one protocol line, newline included
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
