//! # MATRX Render Worker
//!
//! Renderer side of the render request/reply protocol.
//!
//! ## Architecture
//!
//! - **Handler Port** (`handler`): `RenderHandler` turns a request into image
//!   bytes. `StaticRenderHandler` answers every request with the same bytes.
//! - **Consumer** (`consumer`): `RequestConsumer` owns the request queue,
//!   settles deliveries and publishes replies to `matrx.<device id>`.
//! - **Config** (`config`): `WorkerConfig::from_env`.
//!
//! ## Delivery Rules
//!
//! - Undecodable or invalid requests are rejected without requeue
//! - Handler errors become replies with an empty `render_output` and `error` set
//! - A reply the broker does not confirm requeues the request
//!
//! ## Usage Example
//!
//! ```ignore
//! use matrx_render_worker::{RequestConsumer, StaticRenderHandler, WorkerConfig};
//!
//! let consumer = RequestConsumer::new(channel, StaticRenderHandler::new(png), WorkerConfig::from_env());
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let stats = consumer.run(shutdown_rx).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;

pub use config::{default_consumer_tag, WorkerConfig, DEFAULT_PREFETCH_COUNT};
pub use consumer::{ConsumerStats, Disposition, RequestConsumer};
pub use error::WorkerError;
pub use handler::{RenderHandler, StaticRenderHandler};
