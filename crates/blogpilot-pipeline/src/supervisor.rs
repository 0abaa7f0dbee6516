//! One supervisor tick: read run history, queue status and flags, then pick
//! exactly one safe next action.

use std::sync::Arc;

use blogpilot_types::{AllowPublish, PipelineError, PipelineFlags, QueueStatus, Result, RunInfo, RunMode};

use crate::collaborators::{
    FlagStore, IncidentTracker, Notification, Notifier, QueueStatusSource, RunHistory, Severity, WorkflowDispatcher,
};

pub const DEFAULT_HISTORY_WINDOW: usize = 5;
pub const DEFAULT_SAMPLE_LIMIT: usize = 5;
/// Failed runs in the window that trip the safety brake.
pub const UNSTABLE_FAILURES: usize = 2;
pub const MIN_REASON_LEN: usize = 10;

const UNSTABLE_REASON: &str = "Pipeline unstable: >=2 failures detected";

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The outcome of one tick. Rules are evaluated in declaration order and the
/// first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Too many recent failures: turn both flags off and open an incident.
    Disable,
    /// Queue unreadable or empty.
    Idle,
    /// Workflow flag is off; run a safe review.
    ReviewWhileDisabled,
    /// Publishing has not been unlocked by a human.
    ReviewPublishLocked,
    /// No recent successful review run to vouch for publishing.
    ReviewNeedsFreshRun,
    /// Publish, on the strength of this review run.
    Publish { review_url: String },
}

impl Decision {
    /// Mode of the run this decision dispatches, if any.
    pub fn dispatch_mode(&self) -> Option<RunMode> {
        match self {
            Decision::Disable | Decision::Idle => None,
            Decision::Publish { .. } => Some(RunMode::Publish),
            _ => Some(RunMode::Review),
        }
    }
}

pub fn is_unstable(runs: &[RunInfo]) -> bool {
    runs.iter().filter(|r| r.is_failure()).count() >= UNSTABLE_FAILURES
}

/// Most recent successful review-mode run.
pub fn last_successful_review(runs: &[RunInfo]) -> Option<&RunInfo> {
    runs.iter().find(|r| r.mode == RunMode::Review && r.is_success())
}

pub fn decide(queue: Option<&QueueStatus>, runs: &[RunInfo], flags: &PipelineFlags) -> Decision {
    if is_unstable(runs) {
        return Decision::Disable;
    }
    match queue {
        Some(q) if q.total_pending > 0 => {}
        _ => return Decision::Idle,
    }
    if !flags.workflow_enabled {
        return Decision::ReviewWhileDisabled;
    }
    if flags.allow_publish != AllowPublish::HumanEnabled {
        return Decision::ReviewPublishLocked;
    }
    match last_successful_review(runs) {
        Some(run) => Decision::Publish {
            review_url: run.url.clone(),
        },
        None => Decision::ReviewNeedsFreshRun,
    }
}

/// Dispatch reasons are human-facing and must say something.
pub fn validate_dispatch_reason(reason: &str) -> Result<()> {
    if reason.trim().chars().count() < MIN_REASON_LEN {
        return Err(PipelineError::Dispatch(format!(
            "reason must be at least {MIN_REASON_LEN} characters"
        )));
    }
    Ok(())
}

/// A dispatch together with the notification that explains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    pub mode: RunMode,
    pub reason: String,
    pub notification: Notification,
}

/// Reason and notification text for a dispatching decision.
pub fn plan_dispatch(
    decision: &Decision,
    queue: &QueueStatus,
    runs: &[RunInfo],
    flags: &PipelineFlags,
) -> Option<DispatchPlan> {
    let pending = queue.total_pending;
    let run_links = || runs.iter().map(|r| r.url.clone()).collect::<Vec<_>>();
    let (mode, reason, subject, message, links) = match decision {
        Decision::Disable | Decision::Idle => return None,
        Decision::ReviewWhileDisabled => (
            RunMode::Review,
            format!("WF disabled; running safe review for {pending} pending items"),
            "[PIPELINE] Review only",
            format!("WF_ENABLED=false but {pending} pending items exist. Triggered review draft run."),
            queue.sample_urls.clone(),
        ),
        Decision::ReviewPublishLocked => (
            RunMode::Review,
            format!("Publish locked by ALLOW_PUBLISH; review {pending} pending items"),
            "[PIPELINE] Publish locked",
            format!(
                "ALLOW_PUBLISH={}. Ran review to keep queue moving. Consider enabling publish when ready.",
                flags.allow_publish.as_str()
            ),
            queue.sample_urls.clone(),
        ),
        Decision::ReviewNeedsFreshRun => (
            RunMode::Review,
            format!("Need recent successful review before publish ({pending} pending)"),
            "[PIPELINE] Need fresh review",
            "No successful review run found in recent history, so dispatched review instead of publish.".to_string(),
            run_links(),
        ),
        Decision::Publish { review_url } => (
            RunMode::Publish,
            format!("{pending} pending; last review healthy ({review_url})"),
            "[PIPELINE] Publish dispatched",
            format!("Triggered publish for {pending} pending items. Last review run: {review_url}."),
            queue.sample_urls.clone(),
        ),
    };
    Some(DispatchPlan {
        mode,
        reason,
        notification: Notification {
            subject: subject.to_string(),
            message,
            links,
        },
    })
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub history_window: usize,
    pub sample_limit: usize,
    /// Used when the flag store has no `WF_ENABLED` value.
    pub fallback_workflow_enabled: Option<String>,
    /// Used when the flag store has no `ALLOW_PUBLISH` value.
    pub fallback_allow_publish: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            fallback_workflow_enabled: None,
            fallback_allow_publish: None,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    queue: Arc<dyn QueueStatusSource>,
    history: Arc<dyn RunHistory>,
    flags: Arc<dyn FlagStore>,
    dispatcher: Arc<dyn WorkflowDispatcher>,
    notifier: Arc<dyn Notifier>,
    incidents: Arc<dyn IncidentTracker>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        queue: Arc<dyn QueueStatusSource>,
        history: Arc<dyn RunHistory>,
        flags: Arc<dyn FlagStore>,
        dispatcher: Arc<dyn WorkflowDispatcher>,
        notifier: Arc<dyn Notifier>,
        incidents: Arc<dyn IncidentTracker>,
    ) -> Self {
        Self {
            config,
            queue,
            history,
            flags,
            dispatcher,
            notifier,
            incidents,
        }
    }

    /// Evaluate once and carry out the chosen action.
    pub async fn tick(&self) -> Result<Decision> {
        let queue = self.read_queue().await;
        let runs = self.history.recent_runs(self.config.history_window).await?;
        let flags = self.read_flags().await?;

        let decision = decide(queue.as_ref(), &runs, &flags);
        tracing::info!(
            decision = ?decision,
            pending = queue.as_ref().map(|q| q.total_pending),
            runs = runs.len(),
            "Supervisor decision"
        );

        match &decision {
            Decision::Disable => self.disable(&runs, queue.as_ref()).await?,
            Decision::Idle => tracing::info!("No pending items or queue unavailable"),
            _ => {
                if let Some(queue) = queue.as_ref() {
                    if let Some(plan) = plan_dispatch(&decision, queue, &runs, &flags) {
                        self.dispatch(&plan).await?;
                    }
                }
            }
        }
        Ok(decision)
    }

    async fn read_queue(&self) -> Option<QueueStatus> {
        match self.queue.queue_status(self.config.sample_limit).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read queue status");
                None
            }
        }
    }

    async fn read_flags(&self) -> Result<PipelineFlags> {
        let workflow = self
            .flags
            .read_flag(PipelineFlags::WORKFLOW_ENABLED)
            .await?
            .or_else(|| self.config.fallback_workflow_enabled.clone());
        let allow = self
            .flags
            .read_flag(PipelineFlags::ALLOW_PUBLISH)
            .await?
            .or_else(|| self.config.fallback_allow_publish.clone());
        Ok(PipelineFlags::from_raw(workflow.as_deref(), allow.as_deref()))
    }

    async fn dispatch(&self, plan: &DispatchPlan) -> Result<()> {
        validate_dispatch_reason(&plan.reason)?;
        self.dispatcher.dispatch(plan.mode, &plan.reason).await?;
        tracing::info!(mode = %plan.mode, reason = %plan.reason, "Dispatched workflow");
        self.notifier.notify(&plan.notification).await
    }

    async fn write_flag(&self, name: &str, value: &str) -> bool {
        match self.flags.write_flag(name, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(flag = name, error = %e, "Failed to update flag");
                false
            }
        }
    }

    /// Safety brake: flags off, incident opened, human notified.
    async fn disable(&self, runs: &[RunInfo], queue: Option<&QueueStatus>) -> Result<()> {
        let workflow_written = self.write_flag(PipelineFlags::WORKFLOW_ENABLED, "false").await;
        let allow_written = self
            .write_flag(PipelineFlags::ALLOW_PUBLISH, AllowPublish::HumanDisabled.as_str())
            .await;
        let flag_note = if workflow_written && allow_written {
            "WF_ENABLED=false, ALLOW_PUBLISH=human_disabled."
        } else {
            "Could not update WF_ENABLED/ALLOW_PUBLISH automatically. Flip them manually."
        };

        let details = serde_json::to_string_pretty(&serde_json::json!({ "runs": runs }))?;
        self.incidents
            .open_incident(Severity::High, UNSTABLE_REASON, &details)
            .await?;

        let pending = queue
            .map(|q| q.total_pending.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.notifier
            .notify(&Notification {
                subject: "[PIPELINE] Disabled".into(),
                message: format!("{UNSTABLE_REASON}. Pending: {pending}. {flag_note}"),
                links: runs.iter().map(|r| r.url.clone()).collect(),
            })
            .await
    }
}
