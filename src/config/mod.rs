//! Configuration module
//!
//! CLI argument surface and the validated runtime configuration built
//! from it.

mod settings;

pub use settings::*;
