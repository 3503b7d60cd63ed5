//! # MATRX Types Crate
//!
//! This crate contains the render protocol's wire envelopes, identifiers and
//! broker topology.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Client, dispatcher and harness all encode and
//!   decode through the types defined here.
//! - **Validated Identity**: A `DeviceId` that exists is safe to use as a
//!   routing key and as the suffix of a queue name.
//! - **Open Params**: App parameters stay an untyped JSON map; their schema is
//!   owned by the app, not by the protocol.

pub mod correlation;
pub mod entities;
pub mod errors;
pub mod topology;

pub use correlation::CorrelationId;
pub use entities::*;
pub use errors::*;
pub use topology::*;

/// Content type attached to every request and reply message.
pub const CONTENT_TYPE_JSON: &str = "application/json";
