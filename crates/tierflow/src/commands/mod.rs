pub mod plan;
pub mod up;
pub mod validate;

use colored::Colorize;
use std::path::Path;
use tierflow_core::StackConfig;

pub(crate) fn print_stack_file(stack_file: &Path) {
    println!("Stack file: {}", stack_file.display().to_string().cyan());
}

/// Parse and validate a stack file
pub(crate) fn load_stack(stack_file: &Path) -> anyhow::Result<StackConfig> {
    let config = tierflow_core::parse_stack_file(stack_file)?;
    config.validate()?;
    Ok(config)
}
