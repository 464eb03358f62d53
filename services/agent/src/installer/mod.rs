//! Installer Workflow Engine (Component E, §4.E).
//!
//! A linear, resumable step machine driving package acquisition,
//! verification, extraction, and configuration of a managed cluster
//! install.

pub mod acquire;
pub mod configure;
pub mod extract;
pub mod progress;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::InstallerError;
use progress::{ProgressEvent, ProgressReporter};

/// The fixed, ordered step sequence of an install task (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallStep {
    Download,
    Verify,
    Extract,
    ConfigureCluster,
    ConfigureCheckpoint,
    ConfigureJvm,
    InstallPlugins,
    RegisterCluster,
    Complete,
}

impl InstallStep {
    const ORDER: [InstallStep; 9] = [
        InstallStep::Download,
        InstallStep::Verify,
        InstallStep::Extract,
        InstallStep::ConfigureCluster,
        InstallStep::ConfigureCheckpoint,
        InstallStep::ConfigureJvm,
        InstallStep::InstallPlugins,
        InstallStep::RegisterCluster,
        InstallStep::Complete,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Verify => "verify",
            Self::Extract => "extract",
            Self::ConfigureCluster => "configure_cluster",
            Self::ConfigureCheckpoint => "configure_checkpoint",
            Self::ConfigureJvm => "configure_jvm",
            Self::InstallPlugins => "install_plugins",
            Self::RegisterCluster => "register_cluster",
            Self::Complete => "complete",
        }
    }

    /// The `complete` step is terminal and cannot be retried (§4.E).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Complete)
    }

    fn index(&self) -> usize {
        Self::ORDER.iter().position(|s| s == self).expect("step present in ORDER")
    }

    fn next(&self) -> Option<InstallStep> {
        Self::ORDER.get(self.index() + 1).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Per-step invocation outcome, returned by a step's implementation.
pub enum StepOutcome {
    Succeeded,
    Skipped(String),
    Failed(InstallerError),
}

/// Handed to a step's implementation so it can emit intermediate `running`
/// events (e.g. byte-level download progress) without holding a borrow of
/// the workflow itself.
#[derive(Clone)]
pub struct StepProgress {
    task_id: String,
    step: InstallStep,
    reporter: Arc<dyn ProgressReporter>,
}

impl StepProgress {
    pub async fn running(&self, percent: u8, message: impl Into<String>) {
        self.reporter
            .report(ProgressEvent::Running {
                task_id: self.task_id.clone(),
                step: self.step.name(),
                percent: percent.min(100),
                message: message.into(),
            })
            .await;
    }
}

/// Drives the linear step sequence for a single install task, emitting
/// progress events and halting on the first failure until a retry is
/// requested (§4.E).
pub struct InstallWorkflow {
    task_id: String,
    current: InstallStep,
    states: Vec<(InstallStep, StepState)>,
    reporter: Arc<dyn ProgressReporter>,
    /// Overall task progress, 0–100, at step granularity (§3). Monotone
    /// non-decreasing: it only ever advances to
    /// `(stepsCompleted / totalSteps) * 100`, never backward on failure.
    progress: u8,
}

impl InstallWorkflow {
    #[must_use]
    pub fn new(task_id: impl Into<String>, reporter: Arc<dyn ProgressReporter>) -> Self {
        let states = InstallStep::ORDER.iter().map(|s| (*s, StepState::Pending)).collect();
        Self { task_id: task_id.into(), current: InstallStep::Download, states, reporter, progress: 0 }
    }

    /// Overall task progress, 0–100 (§3).
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub fn state_of(&self, step: InstallStep) -> StepState {
        self.states.iter().find(|(s, _)| *s == step).map(|(_, state)| *state).unwrap_or(StepState::Pending)
    }

    fn set_state(&mut self, step: InstallStep, state: StepState) {
        if let Some(entry) = self.states.iter_mut().find(|(s, _)| *s == step) {
            entry.1 = state;
        }
    }

    /// Whether any step prior to `step` is in the `Failed` state, which
    /// blocks forward progress (§4.E, §7 `BlockedByFailure`).
    fn blocked(&self, step: InstallStep) -> bool {
        self.states.iter().take_while(|(s, _)| *s != step).any(|(_, state)| *state == StepState::Failed)
    }

    /// Advances `progress` to at least the fraction of steps completed
    /// through `step`, never letting it move backward.
    fn advance_progress_through(&mut self, step: InstallStep) {
        let total = InstallStep::ORDER.len() as u32;
        let completed = step.index() as u32 + 1;
        let pct = ((completed * 100) / total) as u8;
        self.progress = self.progress.max(pct);
    }

    /// Runs a single step function under cancellation, updating state and
    /// emitting `step-start`/`step-complete`/`step-failed`/`step-skipped`
    /// events.
    async fn run_step<F, Fut>(&mut self, step: InstallStep, cancel: &CancellationToken, f: F) -> Result<(), InstallerError>
    where
        F: FnOnce(StepProgress) -> Fut,
        Fut: std::future::Future<Output = StepOutcome>,
    {
        if self.blocked(step) {
            return Err(InstallerError::BlockedByFailure(step.name().to_string()));
        }

        self.set_state(step, StepState::Running);
        self.reporter.report(ProgressEvent::Start { task_id: self.task_id.clone(), step: step.name() }).await;
        let progress = StepProgress { task_id: self.task_id.clone(), step, reporter: self.reporter.clone() };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => StepOutcome::Failed(InstallerError::StepNotStarted(step.name().to_string())),
            outcome = f(progress) => outcome,
        };

        match outcome {
            StepOutcome::Succeeded => {
                self.set_state(step, StepState::Succeeded);
                self.advance_progress_through(step);
                self.reporter.report(ProgressEvent::Complete { task_id: self.task_id.clone(), step: step.name() }).await;
                info!(task_id = %self.task_id, step = step.name(), "install step completed");
                Ok(())
            }
            StepOutcome::Skipped(reason) => {
                self.set_state(step, StepState::Skipped);
                self.advance_progress_through(step);
                self.reporter
                    .report(ProgressEvent::Skipped { task_id: self.task_id.clone(), step: step.name(), reason: reason.clone() })
                    .await;
                info!(task_id = %self.task_id, step = step.name(), reason = %reason, "install step skipped");
                Ok(())
            }
            StepOutcome::Failed(err) => {
                self.set_state(step, StepState::Failed);
                self.reporter
                    .report(ProgressEvent::Failed { task_id: self.task_id.clone(), step: step.name(), error: err.to_string() })
                    .await;
                error!(task_id = %self.task_id, step = step.name(), error = %err, "install step failed");
                Err(err)
            }
        }
    }

    /// Advances `current` to the step after `step`, if any.
    fn advance_past(&mut self, step: InstallStep) {
        if let Some(next) = step.next() {
            self.current = next;
        }
    }

    /// Re-runs a single named step in isolation, independent of the
    /// workflow's current cursor. The `complete` step is not retryable.
    pub async fn execute_step<F, Fut>(
        &mut self,
        step: InstallStep,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<(), InstallerError>
    where
        F: FnOnce(StepProgress) -> Fut,
        Fut: std::future::Future<Output = StepOutcome>,
    {
        if !step.is_retryable() && self.state_of(step) == StepState::Succeeded {
            return Err(InstallerError::NotRetryable(step.name().to_string()));
        }
        let result = self.run_step(step, cancel, f).await;
        if result.is_ok() {
            self.advance_past(step);
        }
        result
    }

    #[must_use]
    pub fn current_step(&self) -> InstallStep {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::progress::NoopProgressReporter;

    fn workflow() -> InstallWorkflow {
        InstallWorkflow::new("task-1", Arc::new(NoopProgressReporter))
    }

    #[tokio::test]
    async fn steps_advance_in_order_on_success() {
        let mut wf = workflow();
        let cancel = CancellationToken::new();
        wf.execute_step(InstallStep::Download, &cancel, |_progress| async { StepOutcome::Succeeded }).await.unwrap();
        assert_eq!(wf.current_step(), InstallStep::Verify);
        assert_eq!(wf.state_of(InstallStep::Download), StepState::Succeeded);
    }

    #[tokio::test]
    async fn failed_step_blocks_successors() {
        let mut wf = workflow();
        let cancel = CancellationToken::new();
        let err = wf
            .execute_step(InstallStep::Download, &cancel, |_progress| async {
                StepOutcome::Failed(InstallerError::Http("timeout".into()))
            })
            .await;
        assert!(err.is_err());

        let blocked =
            wf.execute_step(InstallStep::Verify, &cancel, |_progress| async { StepOutcome::Succeeded }).await;
        assert!(matches!(blocked, Err(InstallerError::BlockedByFailure(_))));
    }

    #[tokio::test]
    async fn single_step_retry_reruns_only_that_step() {
        let mut wf = workflow();
        let cancel = CancellationToken::new();
        wf.execute_step(InstallStep::Download, &cancel, |_progress| async {
            StepOutcome::Failed(InstallerError::Http("timeout".into()))
        })
        .await
        .unwrap_err();

        wf.execute_step(InstallStep::Download, &cancel, |_progress| async { StepOutcome::Succeeded }).await.unwrap();
        assert_eq!(wf.state_of(InstallStep::Download), StepState::Succeeded);
        assert_eq!(wf.current_step(), InstallStep::Verify);
    }

    #[tokio::test]
    async fn complete_step_is_not_retryable_once_succeeded() {
        let mut wf = workflow();
        let cancel = CancellationToken::new();
        for step in InstallStep::ORDER {
            wf.execute_step(step, &cancel, |_progress| async { StepOutcome::Succeeded }).await.unwrap();
        }
        let retry =
            wf.execute_step(InstallStep::Complete, &cancel, |_progress| async { StepOutcome::Succeeded }).await;
        assert!(matches!(retry, Err(InstallerError::NotRetryable(_))));
    }

    #[tokio::test]
    async fn skippable_step_emits_skipped_and_advances() {
        let mut wf = workflow();
        let cancel = CancellationToken::new();
        wf.execute_step(InstallStep::Download, &cancel, |_progress| async { StepOutcome::Succeeded }).await.unwrap();
        wf.execute_step(InstallStep::Verify, &cancel, |_progress| async {
            StepOutcome::Skipped("checksum already verified".into())
        })
        .await
        .unwrap();
        assert_eq!(wf.state_of(InstallStep::Verify), StepState::Skipped);
        assert_eq!(wf.current_step(), InstallStep::Extract);
    }

    #[tokio::test]
    async fn progress_advances_monotonically_through_steps() {
        let mut wf = workflow();
        let cancel = CancellationToken::new();
        assert_eq!(wf.progress(), 0);

        wf.execute_step(InstallStep::Download, &cancel, |_progress| async { StepOutcome::Succeeded }).await.unwrap();
        let after_download = wf.progress();
        assert!(after_download > 0);

        wf.execute_step(InstallStep::Verify, &cancel, |_progress| async {
            StepOutcome::Failed(InstallerError::ChecksumMismatch { expected: "a".into(), actual: "b".into() })
        })
        .await
        .unwrap_err();
        assert_eq!(wf.progress(), after_download, "a failed step must not move progress backward or forward");

        wf.execute_step(InstallStep::Verify, &cancel, |_progress| async { StepOutcome::Succeeded }).await.unwrap();
        assert!(wf.progress() > after_download);

        for step in [
            InstallStep::Extract,
            InstallStep::ConfigureCluster,
            InstallStep::ConfigureCheckpoint,
            InstallStep::ConfigureJvm,
            InstallStep::InstallPlugins,
            InstallStep::RegisterCluster,
            InstallStep::Complete,
        ] {
            wf.execute_step(step, &cancel, |_progress| async { StepOutcome::Succeeded }).await.unwrap();
        }
        assert_eq!(wf.progress(), 100);
    }

    #[tokio::test]
    async fn running_events_carry_percent_and_message() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let mut wf = InstallWorkflow::new("task-1", Arc::new(crate::installer::progress::ChannelProgressReporter::new(tx)));
        let cancel = CancellationToken::new();

        wf.execute_step(InstallStep::Download, &cancel, |progress| async move {
            progress.running(50, "halfway").await;
            StepOutcome::Succeeded
        })
        .await
        .unwrap();

        let mut saw_running = false;
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Running { percent, message, .. } = event {
                assert_eq!(percent, 50);
                assert_eq!(message, "halfway");
                saw_running = true;
            }
        }
        assert!(saw_running, "expected a Running event between Start and Complete");
    }
}
