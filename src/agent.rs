use crate::{
    config::{ARGS_PARAM, COMMAND_PARAM, Configuration, ParamValue},
    context::AgentContext,
    error::{Error, Result},
};
use std::{
    fs,
    io::Write,
    path::Path,
    process::{Command, Stdio},
};
use tempfile::NamedTempFile;

/// What a task reports back once it finishes successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub summary: Option<String>,
}

/// The payload an agent run executes.
pub trait AgentTask {
    fn name(&self) -> &str;

    fn execute(&mut self, ctx: &AgentContext, out: &mut dyn Write) -> Result<TaskOutcome>;
}

/// Picks the task for a configuration: a `command` parameter selects
/// [`CommandTask`], anything else gets [`DescribeTask`].
pub fn task_for(config: &Configuration) -> Box<dyn AgentTask> {
    match config.parameter(COMMAND_PARAM).and_then(|v| v.as_str()) {
        Some(command) => {
            let args = config
                .parameter(ARGS_PARAM)
                .map(|value| match value {
                    ParamValue::List(items) => items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                })
                .unwrap_or_default();
            Box::new(CommandTask::new(command, args))
        }
        None => Box::new(DescribeTask),
    }
}

/// Reports the agent's purpose and parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescribeTask;

impl AgentTask for DescribeTask {
    fn name(&self) -> &str {
        "describe"
    }

    fn execute(&mut self, ctx: &AgentContext, out: &mut dyn Write) -> Result<TaskOutcome> {
        let params = ctx.config().agent_parameters();
        let write_err = |e: std::io::Error| Error::execution(format!("failed to write output: {e}"));

        writeln!(out, "Purpose: {}", ctx.purpose()).map_err(write_err)?;
        if params.is_empty() {
            writeln!(out, "Parameters: (none)").map_err(write_err)?;
        } else {
            writeln!(out, "Parameters:").map_err(write_err)?;
            for (key, value) in params {
                writeln!(out, "- {key} = {value}").map_err(write_err)?;
            }
        }

        Ok(TaskOutcome {
            summary: Some(format!(
                "described agent with {} parameter(s)",
                params.len()
            )),
        })
    }
}

/// Runs an external command in the context's working directory.
///
/// Arguments may reference `{purpose}` and `{purpose_file}`, the latter being
/// a temporary file holding the purpose text for the duration of the call.
#[derive(Debug, Clone)]
pub struct CommandTask {
    command: String,
    args: Vec<String>,
}

impl CommandTask {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl AgentTask for CommandTask {
    fn name(&self) -> &str {
        &self.command
    }

    fn execute(&mut self, ctx: &AgentContext, out: &mut dyn Write) -> Result<TaskOutcome> {
        let purpose_file = NamedTempFile::new()
            .map_err(|e| Error::execution(format!("failed to create purpose file: {e}")))?;
        fs::write(purpose_file.path(), ctx.purpose())
            .map_err(|e| Error::io(purpose_file.path(), e))?;
        let purpose_file_path = normalize_path(purpose_file.path());

        let mut cmd = Command::new(&self.command);
        for arg in &self.args {
            cmd.arg(replace_template(arg, ctx.purpose(), &purpose_file_path));
        }
        cmd.current_dir(ctx.working_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(command = %self.command, args = ?self.args, "spawning agent command");
        let output = cmd
            .output()
            .map_err(|e| Error::execution(format!("failed to run {}: {e}", self.command)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(Error::execution(format!(
                "{} exited with status {:?}\nstdout:\n{}\nstderr:\n{}",
                self.command,
                output.status.code(),
                stdout.trim(),
                stderr.trim()
            )));
        }

        let stdout = stdout.trim();
        if !stdout.is_empty() {
            writeln!(out, "{stdout}")
                .map_err(|e| Error::execution(format!("failed to write output: {e}")))?;
        }
        if ctx.verbose() && !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "agent command stderr");
        }

        Ok(TaskOutcome {
            summary: Some(format!("{} exited successfully", self.command)),
        })
    }
}

fn replace_template(raw: &str, purpose: &str, purpose_file: &str) -> String {
    raw.replace("{purpose_file}", purpose_file)
        .replace("{purpose}", purpose)
}

fn normalize_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
