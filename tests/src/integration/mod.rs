//! Integration tests across the types, bus, client and worker crates.

pub mod durability;
pub mod isolation;
pub mod round_trip;
