use crate::{
    config::Configuration,
    error::{Error, Result},
};
use chrono::{DateTime, Utc};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tracing::Span;

/// Lifecycle of a single agent execution:
///
/// ```text
/// initialized -> running -> completed
///                        -> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    Initialized,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initialized, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime state for one execution of an agent. Owns its configuration.
#[derive(Debug)]
pub struct AgentContext {
    config: Configuration,
    working_dir: PathBuf,
    verbose: bool,
    status: AgentStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    span: Span,
}

impl AgentContext {
    pub fn create(config: Configuration) -> Self {
        let working_dir = match config.source_path().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let span = tracing::info_span!("agent", purpose = %config.purpose());
        Self {
            config,
            working_dir,
            verbose: false,
            status: AgentStatus::Initialized,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            span,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn transition(&mut self, next: AgentStatus) -> Result<()> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(Error::InvalidTransition { from, to: next });
        }

        let now = Utc::now();
        match next {
            AgentStatus::Running => self.started_at = Some(now),
            AgentStatus::Completed | AgentStatus::Failed => self.finished_at = Some(now),
            AgentStatus::Initialized => {}
        }
        self.status = next;
        self.span
            .in_scope(|| tracing::debug!(%from, to = %next, "status changed"));
        Ok(())
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn purpose(&self) -> &str {
        self.config.purpose()
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Time spent running, or zero if the run never started.
    pub fn elapsed(&self) -> chrono::Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end - start,
            (Some(start), None) => Utc::now() - start,
            _ => chrono::Duration::zero(),
        }
    }
}
