//! Shared model and persistence for padmap
//!
//! This crate holds the pieces both the daemon and the CLI need: the device
//! identity and mapping table model, JSON persistence, the key-name table for
//! the operator boundary, and the control socket protocol types.

mod error;
pub mod keys;
mod model;
pub mod protocol;
mod store;

pub use error::ConfigError;
pub use model::*;
pub use store::{default_config_path, load_config, save_config};
