//! # Render Protocol Entities
//!
//! Defines the request and reply envelopes exchanged through the broker.
//!
//! ## Wire Format
//!
//! ```text
//! request (routing key "renderer_requests"):
//! { "type": "render_request", "app_id": "clock",
//!   "device": { "id": "dev-1", "width": 64, "height": 32 },
//!   "params": { "timezone": "UTC" }, "correlation_id": "..." }
//!
//! reply (routing key = device id):
//! { "render_output": "<base64>", "error"?: "...", "correlation_id"?: "...", ... }
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::correlation::CorrelationId;
use crate::errors::ValidationError;

/// Discriminator value of a render request.
pub const REQUEST_TYPE: &str = "render_request";

/// Discriminator value of a render reply.
pub const REPLY_TYPE: &str = "render_result";

// =============================================================================
// DEVICE
// =============================================================================

/// Identifier of a physical or virtual display.
///
/// Used verbatim as the reply routing key and as the suffix of the reply
/// queue name, so it is validated on construction and on decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Longest id whose queue name `matrx.<id>` fits an AMQP short string.
    /// Longer exchange names lower the limit; see `Topology::check_device`.
    pub const MAX_LEN: usize = 249;

    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }
        if id.len() > Self::MAX_LEN {
            return Err(ValidationError::DeviceIdTooLong {
                len: id.len(),
                max: Self::MAX_LEN,
            });
        }
        if id.contains(['*', '#']) {
            return Err(ValidationError::DeviceIdWildcard { id });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DeviceId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Target display of a render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique display identifier.
    pub id: DeviceId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Device {
    pub fn new(id: DeviceId, width: u32, height: u32) -> Result<Self, ValidationError> {
        let device = Self { id, width, height };
        device.validate()?;
        Ok(device)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.width == 0 || self.height == 0 {
            return Err(ValidationError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// The `type` discriminator of a request. Only one kind exists; decoding any
/// other value fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestKind {
    #[default]
    #[serde(rename = "render_request")]
    RenderRequest,
}

/// A request to render one app for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Fixed discriminator.
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Rendering routine to invoke.
    pub app_id: String,
    /// Target display.
    pub device: Device,
    /// App-specific parameters. Keys serialize in sorted order.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Client-generated id echoed by the renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl RenderRequest {
    pub fn new(app_id: impl Into<String>, device: Device) -> Self {
        Self {
            kind: RequestKind::RenderRequest,
            app_id: app_id.into(),
            device,
            params: Map::new(),
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Check the fields the type system cannot enforce.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.app_id.trim().is_empty() {
            return Err(ValidationError::EmptyAppId);
        }
        self.device.validate()
    }

    /// Canonical JSON encoding used as the message body.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ValidationError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a message body.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, ValidationError> {
        let request: Self = serde_json::from_slice(body)?;
        request.validate()?;
        Ok(request)
    }
}

// =============================================================================
// REPLY
// =============================================================================

/// A renderer's answer, published to the requesting device's queue.
///
/// Only `render_output` is required. An empty output or a present `error`
/// marks a failed render. Unknown fields are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderReply {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Base64-encoded image payload.
    pub render_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RenderReply {
    /// Reply carrying an already encoded payload and nothing else.
    pub fn from_output(render_output: impl Into<String>) -> Self {
        Self {
            kind: None,
            render_output: render_output.into(),
            error: None,
            correlation_id: None,
            device_id: None,
            app_id: None,
            processed_at: None,
            extra: Map::new(),
        }
    }

    /// Successful reply to `request`, encoding `image` as base64.
    pub fn success(request: &RenderRequest, image: &[u8]) -> Self {
        Self::echoing(request, STANDARD.encode(image), None)
    }

    /// Failed reply to `request`: empty output plus an error message.
    pub fn failure(request: &RenderRequest, error: impl Into<String>) -> Self {
        Self::echoing(request, String::new(), Some(error.into()))
    }

    fn echoing(request: &RenderRequest, render_output: String, error: Option<String>) -> Self {
        Self {
            kind: Some(REPLY_TYPE.to_string()),
            render_output,
            error,
            correlation_id: request.correlation_id.clone(),
            device_id: Some(request.device.id.to_string()),
            app_id: Some(request.app_id.clone()),
            processed_at: Some(Utc::now()),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.render_output.is_empty()
    }

    /// Decode the base64 payload.
    pub fn decode_output(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.render_output.as_bytes())
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ValidationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_slice(body: &[u8]) -> Result<Self, ValidationError> {
        Ok(serde_json::from_slice(body)?)
    }
}
