//! assetflow core library
//!
//! Configuration, filesystem layout and error handling shared by the
//! pipeline crates and the CLI.

pub mod config;
pub mod error;
pub mod layout;

pub use config::{Config, ScriptEntry};
pub use error::{CoreError, Result};
pub use layout::Layout;
