pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use error::{DaiaError, Result};
