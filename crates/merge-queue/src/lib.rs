//! # Merge Queue Orchestrator
//!
//! Automated pull-request merge queue: takes the candidate PRs named in an
//! originating issue, acquires a distributed lock (a labelled tracking
//! issue), waits for approval from the approver team, validates each
//! candidate, then serially rebases, re-tests, and merges the mergeable
//! subset before reporting outcomes back to the originator.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use merge_queue::{Config, GitHubClient, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config {
//!     repository: "5dlabs/demo".to_string(),
//!     ..Config::default()
//! };
//! let platform = GitHubClient::new(&config.repository, "ghp_token")?;
//! let orchestrator = Orchestrator::new(Arc::new(platform), config);
//!
//! let outcome = orchestrator.run(42, &CancellationToken::new()).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! All durable state lives on the hosting platform as issues and comments;
//! the process itself keeps nothing across restarts.

pub mod approval;
pub mod config;
pub mod lock;
pub mod orchestrator;
pub mod outcome;
pub mod pipeline;
pub mod platform;
pub mod poll;
pub mod report;
pub mod request;
pub mod validate;

pub use approval::{ApprovalController, ApprovalVerdict};
pub use config::Config;
pub use lock::{CompletionStatus, LockAcquisition, LockManager};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use outcome::{Outcome, OutcomeBucket, OutcomeSet};
pub use pipeline::MergePipeline;
pub use platform::{GitHubClient, Platform, PlatformError};
pub use report::Reporter;
pub use request::{ExtractError, MergeRequest};
pub use validate::{ValidationReport, Validator};
