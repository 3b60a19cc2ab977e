pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

/// Environment variable that points directly at a stack file
pub const CONFIG_PATH_ENV: &str = "TIERFLOW_CONFIG_PATH";

/// Candidate file names, most specific first
const CANDIDATES: [&str; 4] = ["stack.local.kdl", ".stack.local.kdl", "stack.kdl", ".stack.kdl"];

/// Locate the stack file starting from the current directory
///
/// Search order:
/// 1. `TIERFLOW_CONFIG_PATH`
/// 2. current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. `./.tierflow/` with the same order
/// 4. `~/.config/tierflow/stack.kdl`
pub fn find_stack_file() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    find_stack_file_from(&current_dir)
}

/// Same as [`find_stack_file`] with an explicit starting directory
pub fn find_stack_file_from(dir: &Path) -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", CONFIG_PATH_ENV);
    }

    if let Some(path) = first_existing(dir) {
        return Ok(path);
    }

    let stack_dir = dir.join(".tierflow");
    if stack_dir.is_dir()
        && let Some(path) = first_existing(&stack_dir)
    {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("tierflow").join("stack.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|filename| dir.join(filename))
        .find(|path| path.exists())
}
