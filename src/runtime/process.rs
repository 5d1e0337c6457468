//! Subprocess runtime - runs steps through a host shell or the docker CLI

use crate::core::definition::StepDefinition;
use crate::runtime::{
    PreprocessorOutput, RuntimeConfig, RuntimeContext, RuntimeError, RuntimeExecutor, RuntimeMode,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Workspace mount point inside containers
const CONTAINER_WORKSPACE: &str = "/workspace";

/// A step started with `background: true`
#[derive(Debug)]
struct BackgroundProcess {
    step: String,
    child: Child,
    container: Option<String>,
}

/// Runtime executor backed by `tokio::process`
#[derive(Debug)]
pub struct ProcessRuntime {
    config: RuntimeConfig,
    context: Mutex<Option<RuntimeContext>>,
    background: tokio::sync::Mutex<Vec<BackgroundProcess>>,
}

impl ProcessRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            context: Mutex::new(None),
            background: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn context(&self) -> Result<RuntimeContext, RuntimeError> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RuntimeError::NotInitialized)
    }

    fn container_name(context: &RuntimeContext, step: &str) -> String {
        let id = context.pipeline_id.simple().to_string();
        let step: String = step
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        format!("pipeline-{}-{}", &id[..8], step)
    }

    /// Environment handed to the step process
    fn step_env(context: &RuntimeContext, step: &StepDefinition) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = context
            .environment
            .variables()
            .iter()
            .filter(|v| v.kind == crate::core::environment::VariableType::Internal)
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect();
        env.extend(
            step.environment
                .iter()
                .flatten()
                .filter_map(|e| e.value.as_ref().map(|v| (e.name.clone(), v.clone()))),
        );
        env
    }

    fn working_dir(workspace: &Path, step: &StepDefinition) -> PathBuf {
        match &step.working_dir {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => workspace.join(dir),
            None => workspace.to_path_buf(),
        }
    }

    fn host_command(&self, context: &RuntimeContext, step: &StepDefinition) -> Command {
        let shell = step.shell.clone().unwrap_or_else(|| self.config.shell.clone());
        let mut command = Command::new(shell);
        command
            .arg("-c")
            .arg(step.commands.join("\n"))
            .current_dir(Self::working_dir(&context.workspace, step))
            .envs(Self::step_env(context, step));
        command
    }

    fn docker_command(
        &self,
        context: &RuntimeContext,
        step: &StepDefinition,
        container: &str,
    ) -> Command {
        let mut command = Command::new(&self.config.docker_path);
        command.args(["run", "--rm", "--name", container]);
        command
            .arg("-v")
            .arg(format!("{}:{}", context.workspace.display(), CONTAINER_WORKSPACE));
        for volume in step.volumes.iter().flatten() {
            command.arg("-v").arg(volume);
        }
        for (name, value) in Self::step_env(context, step) {
            command.arg("-e").arg(format!("{}={}", name, value));
        }
        for port in &step.ports {
            command.arg("-p").arg(port);
        }
        if let Some(hostname) = &step.hostname {
            command.arg("--hostname").arg(hostname);
        }
        let working_dir = match &step.working_dir {
            Some(dir) if dir.starts_with('/') => dir.clone(),
            Some(dir) => format!("{}/{}", CONTAINER_WORKSPACE, dir),
            None => CONTAINER_WORKSPACE.to_string(),
        };
        command.arg("-w").arg(working_dir);

        let image = step
            .image
            .clone()
            .unwrap_or_else(|| self.config.default_image.clone());
        command.arg(image);

        if !step.commands.is_empty() {
            let shell = step.shell.clone().unwrap_or_else(|| self.config.shell.clone());
            command.arg(shell).arg("-c").arg(step.commands.join("\n"));
        }
        command
    }

    fn program(&self, step: &StepDefinition) -> String {
        match self.config.mode {
            RuntimeMode::Host => step.shell.clone().unwrap_or_else(|| self.config.shell.clone()),
            RuntimeMode::Docker => self.config.docker_path.clone(),
        }
    }
}

#[async_trait]
impl RuntimeExecutor for ProcessRuntime {
    async fn init(&self, context: &RuntimeContext) -> Result<(), RuntimeError> {
        {
            let mut slot = self.context.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = slot.as_ref() {
                return Err(RuntimeError::AlreadyInitialized(existing.pipeline_id.to_string()));
            }
            *slot = Some(context.clone());
        }

        tokio::fs::create_dir_all(&context.workspace).await?;
        info!(
            "Runtime ({}) ready for pipeline {} in {}",
            self.config.mode,
            context.pipeline_id,
            context.workspace.display()
        );
        Ok(())
    }

    async fn run_step(&self, mut step: StepDefinition) -> Result<StepDefinition, RuntimeError> {
        let context = self.context()?;

        if self.config.mode == RuntimeMode::Host && step.commands.is_empty() {
            warn!(
                "Step '{}' has no commands; image {:?} is ignored in host mode",
                step.name, step.image
            );
            step.exit_code = Some(0);
            return Ok(step);
        }

        let container = Self::container_name(&context, &step.name);
        let mut command = match self.config.mode {
            RuntimeMode::Host => self.host_command(&context, &step),
            RuntimeMode::Docker => self.docker_command(&context, &step, &container),
        };
        debug!(
            "Running step '{}': {}",
            step.name,
            context.environment.redact(&step.commands.join(" && "))
        );

        let program = self.program(&step);
        if step.background {
            let child = command
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|source| RuntimeError::Spawn { program, source })?;
            info!("Step '{}' started in the background", step.name);
            self.background.lock().await.push(BackgroundProcess {
                step: step.name.clone(),
                child,
                container: (self.config.mode == RuntimeMode::Docker).then_some(container),
            });
            step.exit_code = Some(0);
            return Ok(step);
        }

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            command.kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| RuntimeError::Timeout(self.config.timeout_secs))?
        .map_err(|source| RuntimeError::Spawn { program, source })?;

        let stdout = context.environment.redact(&String::from_utf8_lossy(&output.stdout));
        if !stdout.trim().is_empty() {
            debug!("[{}] {}", step.name, stdout.trim_end());
        }

        let code = output.status.code().unwrap_or(-1);
        step.exit_code = Some(code);
        if !output.status.success() {
            let stderr = context.environment.redact(&String::from_utf8_lossy(&output.stderr));
            warn!("Step '{}' exited with code {}: {}", step.name, code, stderr.trim());
            return Err(RuntimeError::StepFailed {
                step: step.name.clone(),
                code,
                message: stderr.trim().to_string(),
            });
        }

        Ok(step)
    }

    async fn run_preprocessor(
        &self,
        image: &str,
        input: &str,
    ) -> Result<PreprocessorOutput, RuntimeError> {
        let context = self.context()?;

        let (program, mut command) = match self.config.mode {
            RuntimeMode::Docker => {
                let mut command = Command::new(&self.config.docker_path);
                command.args(["run", "--rm", "-i", image]);
                (self.config.docker_path.clone(), command)
            }
            RuntimeMode::Host => {
                // In host mode the "image" is a command line reading stdin
                let mut command = Command::new(&self.config.shell);
                command.arg("-c").arg(image).current_dir(&context.workspace);
                (self.config.shell.clone(), command)
            }
        };

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn { program, source })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| RuntimeError::Timeout(self.config.timeout_secs))??;

        Ok(PreprocessorOutput {
            status: output.status.code().unwrap_or(-1),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    async fn tear_down(&self) -> Result<(), RuntimeError> {
        let processes: Vec<BackgroundProcess> = self.background.lock().await.drain(..).collect();

        for mut process in processes {
            debug!("Stopping background step '{}'", process.step);
            if let Err(e) = process.child.kill().await {
                debug!("Background step '{}' already gone: {}", process.step, e);
            }
            if let Some(container) = process.container {
                let removed = Command::new(&self.config.docker_path)
                    .args(["rm", "-f", &container])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                if let Err(e) = removed {
                    warn!("Failed to remove container {}: {}", container, e);
                }
            }
        }
        Ok(())
    }
}
