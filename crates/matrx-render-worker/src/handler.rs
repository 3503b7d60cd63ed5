//! Render handler port.
//!
//! The consumer owns the broker side; a `RenderHandler` only turns a
//! validated request into image bytes.

use async_trait::async_trait;
use matrx_types::RenderRequest;

use crate::error::WorkerError;

/// Produces the raw output of one render (Driven Port).
#[async_trait]
pub trait RenderHandler: Send + Sync {
    /// Render `request`. The consumer base64-encodes the returned bytes.
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, WorkerError>;
}

/// Answers every request with the same bytes.
#[derive(Debug, Clone, Default)]
pub struct StaticRenderHandler {
    output: Vec<u8>,
}

impl StaticRenderHandler {
    pub fn new(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl RenderHandler for StaticRenderHandler {
    async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, WorkerError> {
        if self.output.is_empty() {
            return Err(WorkerError::Handler("no output configured".to_string()));
        }
        Ok(self.output.clone())
    }
}
