//! Queue processing, retry engine, draft validation and the supervisor automaton.
//!
//! This crate implements the Blogpilot run loop: pending rows are drafted one
//! at a time (or pre-generated in one batch), checked against the content
//! rules, and either saved for review or published and backfilled. The
//! supervisor decides, once per tick, whether the next run may publish.

pub mod collaborators;
pub mod executor;
pub mod preview;
pub mod prompt;
pub mod retry;
pub mod supervisor;
pub mod validation;

pub use collaborators::{
    ArticlePublisher, FlagStore, IncidentTracker, Notification, Notifier, PublishedArticle, QueueStatusSource,
    QueueStore, RunHistory, Severity, WorkflowDispatcher,
};
pub use executor::{resolve_mode, write_summary, ExecutorContext, ExecutorSettings, QueueProcessor, RunOutcome};
pub use preview::{slugify, PreviewPaths, PreviewWriter};
pub use prompt::{PromptTemplate, RULES_SUFFIX, URL_PLACEHOLDER};
pub use retry::{with_retry, RetryPolicy};
pub use supervisor::{decide, plan_dispatch, validate_dispatch_reason, Decision, DispatchPlan, Supervisor, SupervisorConfig};
pub use validation::validate_no_years;
