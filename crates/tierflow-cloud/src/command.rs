//! External engine executable wrapper
//!
//! Delegates every engine call to an external program. The program is
//! invoked as `<program> [args...] <operation>` with a JSON request on stdin
//! and must print a JSON response on stdout:
//!
//! | operation | request                           | response                     |
//! |-----------|-----------------------------------|------------------------------|
//! | `create`  | `{"name", "kind", "properties"}`  | `{"action", "attributes"}`   |
//! | `zones`   | `{"region"}`                      | `["zone-a", ...]`            |
//! | `image`   | `{"owners", "filters"}`           | `"image-id"`                 |

use crate::action::Applied;
use crate::engine::{CreateRequest, ImageFilter, ProvisioningEngine, RetryConfig};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Engine backed by an external executable
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    retry: RetryConfig,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Arguments placed before the operation name
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run one operation and return stdout
    async fn run_command(&self, operation: &str, input: &[u8]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.arg(operation);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(
            "Running: {} {} {}",
            self.program,
            self.args.join(" "),
            operation
        );

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CloudError::EngineNotFound(self.program.clone())
            } else {
                CloudError::Io(e)
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run an operation with retries and decode its JSON response
    async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let input = serde_json::to_vec(request)?;
        let attempts = self.retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            match self.run_command(operation, &input).await {
                Ok(output) => return Ok(serde_json::from_str(output.trim())?),
                Err(CloudError::EngineNotFound(program)) => {
                    return Err(CloudError::EngineNotFound(program));
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        error = %e,
                        "Engine call failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Serialize)]
struct ZonesRequest<'a> {
    region: &'a str,
}

#[async_trait]
impl ProvisioningEngine for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn create(&self, request: &CreateRequest) -> Result<Applied> {
        self.call("create", request).await
    }

    async fn availability_zones(&self, region: &str) -> Result<Vec<String>> {
        self.call("zones", &ZonesRequest { region }).await
    }

    async fn latest_image(&self, filter: &ImageFilter) -> Result<String> {
        self.call("image", filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let engine = CommandEngine::new("tierflow-engine-that-does-not-exist");
        let result = engine.availability_zones("us-east-1").await;
        assert!(matches!(result, Err(CloudError::EngineNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zones_from_shell_engine() {
        let engine = CommandEngine::new("sh")
            .with_args(["-c", r#"cat > /dev/null; echo '["us-east-1a","us-east-1b"]'"#, "engine"])
            .with_retry(no_retry());

        let zones = engine.availability_zones("us-east-1").await.unwrap();
        assert_eq!(zones, vec!["us-east-1a", "us-east-1b"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_from_shell_engine() {
        let engine = CommandEngine::new("sh")
            .with_args([
                "-c",
                r#"cat > /dev/null; echo '{"action":"create","attributes":{"id":"vpc-1"}}'"#,
                "engine",
            ])
            .with_retry(no_retry());

        let applied = engine
            .create(&CreateRequest::new("vpc", crate::kind::VPC))
            .await
            .unwrap();
        assert!(applied.has_changes());
        assert_eq!(applied.attributes["id"], serde_json::json!("vpc-1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_engine_reports_stderr() {
        let engine = CommandEngine::new("sh")
            .with_args(["-c", "cat > /dev/null; echo quota exceeded >&2; exit 1", "engine"])
            .with_retry(no_retry());

        match engine.latest_image(&ImageFilter::new(["amazon"])).await {
            Err(CloudError::CommandFailed(message)) => assert_eq!(message, "quota exceeded"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
