//! Text generation capability
//!
//! Node bodies reach external text-generation services only through the
//! [`TextGenerator`] trait, so workflows stay independent of any one vendor.

pub mod generator;
pub mod types;

pub use generator::*;
pub use types::*;
