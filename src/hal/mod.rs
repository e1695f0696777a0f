//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`] for various platforms.
//!
//! # Available Implementations
//!
//! - `mock`: Test implementations for desktop development
//! - `system`: Std-backed clock and delay (requires `std`)

pub mod mock;

#[cfg(feature = "std")]
pub mod system;

pub use mock::*;

#[cfg(feature = "std")]
pub use system::*;
