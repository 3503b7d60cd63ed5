//! # MATRX Render Client
//!
//! Client side of the render request/reply protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       RenderClient                             │
//! │                                                                │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌─────────────┐  │
//! │  │ ReplyQueue       │  │ RequestPublisher │  │ ReplyWaiter │  │
//! │  │ Provisioner      │  │ (confirms,       │  │ (select!:   │  │
//! │  │ (idempotent      │  │  mandatory)      │  │  stream,    │  │
//! │  │  declare + bind) │  │                  │  │  deadline,  │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  │  cancel)    │  │
//! │           │                     │            └──────┬──────┘  │
//! └───────────┼─────────────────────┼───────────────────┼─────────┘
//!             ▼                     ▼                   ▲
//!   matrx.<device id>   ──  exchange "matrx"  ──  renderer reply
//!                         "renderer_requests"
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use matrx_render_client::{CancelSignal, ClientConfig, RenderClient};
//!
//! let client = RenderClient::new(broker, ClientConfig::from_env());
//! let round_trip = client.render(request, None, CancelSignal::never()).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod provisioner;
pub mod publisher;
pub mod waiter;

pub use client::{RenderClient, RoundTrip};
pub use config::ClientConfig;
pub use domain::{
    cancellation, CancelHandle, CancelSignal, ReplyMatching, StaleReplyPolicy, WaitOutcome,
    WaiterState,
};
pub use error::{RenderClientError, ReplyRejection};
pub use provisioner::{ReplyQueue, ReplyQueueProvisioner};
pub use publisher::{PublishReceipt, RequestPublisher};
pub use waiter::ReplyWaiter;
