//! Configuration for code executors
//!
//! Runtime policy is expressed as typed structs passed to executor
//! constructors. The same structs can be loaded from a YAML settings file.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;


use crate::errors::CodeExecutorError;
use std::path::Path;

/// Load settings from a YAML file
pub async fn load_settings<P: AsRef<Path>>(path: P) -> Result<CodeExecutionSettings, CodeExecutorError> {
    ConfigLoader::from_file(path).await
}
