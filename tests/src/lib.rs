//! # MATRX Test Suite
//!
//! Cross-crate flows over the in-process broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Broker setup, fake renderers
//! └── integration/
//!     ├── round_trip.rs # Client ↔ renderer request/reply
//!     ├── isolation.rs  # Per-device queues, correlation matching
//!     └── durability.rs # Broker restarts
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p matrx-tests
//! cargo test -p matrx-tests integration::round_trip
//! ```

#![allow(dead_code)]

#[cfg(test)]
pub mod fixtures;
pub mod integration;
