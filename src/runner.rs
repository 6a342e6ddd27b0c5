use crate::{
    agent::{AgentTask, TaskOutcome, task_for},
    context::{AgentContext, AgentStatus},
    error::{Error, Result},
};
use std::{
    io::Write,
    panic::{self, AssertUnwindSafe},
};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

/// Outcome of one agent run. Always carries a terminal status unless the
/// context could not be started at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    status: AgentStatus,
    error: Option<String>,
    exit_code: i32,
    summary: Option<String>,
    elapsed: chrono::Duration,
}

impl ExecutionResult {
    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.elapsed
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Completed
    }

    fn completed(outcome: TaskOutcome, elapsed: chrono::Duration) -> Self {
        Self {
            status: AgentStatus::Completed,
            error: None,
            exit_code: 0,
            summary: outcome.summary,
            elapsed,
        }
    }

    fn failed(err: &Error, elapsed: chrono::Duration) -> Self {
        Self {
            status: AgentStatus::Failed,
            error: Some(err.to_string()),
            exit_code: 1,
            summary: None,
            elapsed,
        }
    }
}

/// Drives an [`AgentContext`] through its lifecycle around a task.
pub struct AgentRunner<W: Write> {
    task: Option<Box<dyn AgentTask>>,
    options: RunOptions,
    out: W,
}

impl<W: Write> AgentRunner<W> {
    /// Runner that picks its task from the context's configuration.
    pub fn new(out: W) -> Self {
        Self {
            task: None,
            options: RunOptions::default(),
            out,
        }
    }

    pub fn with_task(mut self, task: Box<dyn AgentTask>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Runs the context to a terminal state. Failures are reported in the
    /// returned result and never propagated.
    pub fn execute(&mut self, ctx: &mut AgentContext) -> ExecutionResult {
        if let Err(err) = ctx.transition(AgentStatus::Running) {
            tracing::warn!(error = %err, "agent context cannot be started");
            return ExecutionResult::failed(&err, chrono::Duration::zero());
        }

        let span = ctx.span().clone();
        let _guard = span.enter();

        let outcome = self.check_ready(ctx).and_then(|()| self.run_task(ctx));
        let next = match outcome {
            Ok(_) => AgentStatus::Completed,
            Err(_) => AgentStatus::Failed,
        };
        if let Err(err) = ctx.transition(next) {
            // running -> completed/failed is always allowed
            tracing::error!(error = %err, "unexpected lifecycle error");
        }

        let result = match outcome {
            Ok(outcome) => ExecutionResult::completed(outcome, ctx.elapsed()),
            Err(err) => ExecutionResult::failed(&err, ctx.elapsed()),
        };
        match result.error() {
            None => tracing::info!(status = %result.status(), "agent run finished"),
            Some(error) => tracing::warn!(status = %result.status(), %error, "agent run finished"),
        }
        result
    }

    fn check_ready(&self, ctx: &AgentContext) -> Result<()> {
        let dir = ctx.working_dir();
        if !dir.is_dir() {
            return Err(Error::execution(format!(
                "working directory {} does not exist",
                dir.display()
            )));
        }
        Ok(())
    }

    fn run_task(&mut self, ctx: &AgentContext) -> Result<TaskOutcome> {
        // only an injected task outlives this run; one derived from the
        // config belongs to this context alone
        let (mut task, injected) = match self.task.take() {
            Some(task) => (task, true),
            None => (task_for(ctx.config()), false),
        };

        if self.options.dry_run {
            writeln!(self.out, "[dry-run] would run task `{}`", task.name())
                .map_err(|e| Error::execution(format!("failed to write output: {e}")))?;
            if injected {
                self.task = Some(task);
            }
            return Ok(TaskOutcome {
                summary: Some("dry run; task not executed".to_string()),
            });
        }

        tracing::debug!(task = task.name(), "executing task");
        let out = &mut self.out;
        let result = panic::catch_unwind(AssertUnwindSafe(|| task.execute(ctx, out)));
        if injected {
            self.task = Some(task);
        }
        match result {
            Ok(result) => result,
            Err(payload) => Err(Error::execution(format!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, ParamValue};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct Scripted(std::result::Result<&'static str, &'static str>);

    impl AgentTask for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn execute(&mut self, _ctx: &AgentContext, out: &mut dyn Write) -> Result<TaskOutcome> {
            match self.0 {
                Ok(summary) => {
                    writeln!(out, "working").unwrap();
                    Ok(TaskOutcome {
                        summary: Some(summary.to_string()),
                    })
                }
                Err(message) => Err(Error::execution(message)),
            }
        }
    }

    struct Panicking;

    impl AgentTask for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn execute(&mut self, _ctx: &AgentContext, _out: &mut dyn Write) -> Result<TaskOutcome> {
            panic!("agent blew up");
        }
    }

    fn context(dir: &std::path::Path) -> AgentContext {
        let cfg = Configuration::new("demo", BTreeMap::new(), dir.join("config.yaml")).unwrap();
        AgentContext::create(cfg)
    }

    #[test]
    fn successful_task_completes() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let mut runner = AgentRunner::new(Vec::<u8>::new()).with_task(Box::new(Scripted(Ok("done"))));

        let result = runner.execute(&mut ctx);
        assert_eq!(result.status(), AgentStatus::Completed);
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.summary(), Some("done"));
        assert!(result.error().is_none());
        assert_eq!(ctx.status(), AgentStatus::Completed);
        assert_eq!(runner.into_inner(), b"working\n");
    }

    #[test]
    fn failing_task_is_captured() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let mut runner =
            AgentRunner::new(Vec::<u8>::new()).with_task(Box::new(Scripted(Err("no route"))));

        let result = runner.execute(&mut ctx);
        assert_eq!(result.status(), AgentStatus::Failed);
        assert_eq!(result.exit_code(), 1);
        assert!(result.error().unwrap().contains("no route"));
        assert_eq!(ctx.status(), AgentStatus::Failed);
    }

    #[test]
    fn panicking_task_is_captured() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let mut runner = AgentRunner::new(Vec::<u8>::new()).with_task(Box::new(Panicking));

        let result = runner.execute(&mut ctx);
        assert_eq!(result.status(), AgentStatus::Failed);
        assert!(result.error().unwrap().contains("agent blew up"));
        assert_eq!(ctx.status(), AgentStatus::Failed);
    }

    #[test]
    fn missing_working_dir_fails_readiness() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path()).with_working_dir(dir.path().join("gone"));
        let mut runner = AgentRunner::new(Vec::<u8>::new()).with_task(Box::new(Scripted(Ok("done"))));

        let result = runner.execute(&mut ctx);
        assert_eq!(result.status(), AgentStatus::Failed);
        assert!(result.error().unwrap().contains("does not exist"));
        assert!(runner.into_inner().is_empty());
    }

    #[test]
    fn finished_context_cannot_run_again() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let mut runner = AgentRunner::new(Vec::<u8>::new()).with_task(Box::new(Scripted(Ok("done"))));
        assert!(runner.execute(&mut ctx).is_success());

        let again = runner.execute(&mut ctx);
        assert_eq!(again.status(), AgentStatus::Failed);
        assert!(again.error().unwrap().contains("invalid lifecycle transition"));
        assert_eq!(ctx.status(), AgentStatus::Completed);
    }

    #[test]
    fn dry_run_skips_the_task() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let mut runner = AgentRunner::new(Vec::<u8>::new())
            .with_task(Box::new(Scripted(Err("should not run"))))
            .with_options(RunOptions { dry_run: true });

        let result = runner.execute(&mut ctx);
        assert!(result.is_success());
        let text = String::from_utf8(runner.into_inner()).unwrap();
        assert_eq!(text, "[dry-run] would run task `scripted`\n");
    }

    #[test]
    fn picks_a_fresh_task_for_each_context() {
        let dir = tempdir().unwrap();
        let mut runner = AgentRunner::new(Vec::<u8>::new());

        let mut first = context(dir.path());
        assert!(runner.execute(&mut first).is_success());

        let params = BTreeMap::from([(
            "command".to_string(),
            ParamValue::String("openmog-definitely-not-installed".to_string()),
        )]);
        let cfg = Configuration::new("demo", params, dir.path().join("config.yaml")).unwrap();
        let mut second = AgentContext::create(cfg);
        let result = runner.execute(&mut second);
        assert_eq!(result.status(), AgentStatus::Failed);
        assert!(result.error().unwrap().contains("openmog-definitely-not-installed"));
    }

    #[test]
    fn injected_task_is_reused_across_runs() {
        let dir = tempdir().unwrap();
        let mut runner =
            AgentRunner::new(Vec::<u8>::new()).with_task(Box::new(Scripted(Ok("done"))));
        for _ in 0..2 {
            let mut ctx = context(dir.path());
            assert_eq!(runner.execute(&mut ctx).summary(), Some("done"));
        }
        assert_eq!(runner.into_inner(), b"working\nworking\n");
    }

    #[test]
    fn never_leaves_context_running() {
        let dir = tempdir().unwrap();
        let tasks: Vec<Box<dyn AgentTask>> = vec![
            Box::new(Scripted(Ok("ok"))),
            Box::new(Scripted(Err("bad"))),
            Box::new(Panicking),
        ];
        for task in tasks {
            let mut ctx = context(dir.path());
            let result = AgentRunner::new(std::io::sink()).with_task(task).execute(&mut ctx);
            assert!(ctx.status().is_terminal());
            assert_eq!(result.status(), ctx.status());
        }
    }
}
