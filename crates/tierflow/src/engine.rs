use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tierflow_cloud::{CommandEngine, LocalEngine, ProvisioningEngine};

/// Engine selection shared by `plan` and `up`
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// External engine executable (JSON over stdio); the local engine is used when unset
    #[arg(long, env = "TIERFLOW_ENGINE_COMMAND")]
    pub engine_command: Option<String>,

    /// Extra argument passed to the engine executable before the operation name
    #[arg(long = "engine-arg", requires = "engine_command")]
    pub engine_args: Vec<String>,

    /// Directory holding `.tierflow/` (defaults to the stack file's directory)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Make the local engine reject the named resource
    #[arg(long, hide = true)]
    pub simulate_failure: Vec<String>,
}

impl EngineArgs {
    /// Directory that receives the state file and the run lock
    pub fn state_root(&self, stack_file: &Path) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        match stack_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn describe(&self) -> String {
        match &self.engine_command {
            Some(program) => format!("command ({})", program),
            None => "local".to_string(),
        }
    }

    pub async fn build(
        &self,
        stack_file: &Path,
        region: &str,
    ) -> anyhow::Result<Arc<dyn ProvisioningEngine>> {
        if let Some(program) = &self.engine_command {
            tracing::debug!(program = %program, "Using command engine");
            let engine = CommandEngine::new(program.clone()).with_args(self.engine_args.clone());
            return Ok(Arc::new(engine));
        }

        let root = self.state_root(stack_file);
        tracing::debug!(root = %root.display(), "Using local engine");
        let engine = self
            .simulate_failure
            .iter()
            .fold(LocalEngine::open(&root, region).await?, |engine, name| {
                engine.with_failure(name.clone())
            });
        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_root_defaults_to_stack_directory() {
        let args = EngineArgs::default();
        assert_eq!(
            args.state_root(Path::new("/srv/shop/stack.kdl")),
            PathBuf::from("/srv/shop")
        );
        assert_eq!(args.state_root(Path::new("stack.kdl")), PathBuf::from("."));
    }

    #[test]
    fn test_explicit_state_dir_wins() {
        let args = EngineArgs {
            state_dir: Some(PathBuf::from("/var/lib/tier")),
            ..Default::default()
        };
        assert_eq!(
            args.state_root(Path::new("/srv/shop/stack.kdl")),
            PathBuf::from("/var/lib/tier")
        );
        assert_eq!(args.describe(), "local");
    }
}
