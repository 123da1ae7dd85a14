//! Services layer (ports + adapters).
//!
//! - `ports`: pure contracts/types used across the kernel.
//! - `adapters`: IO and runtime specific implementations.

pub mod adapters;
pub mod ports;
