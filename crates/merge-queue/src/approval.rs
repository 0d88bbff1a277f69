//! Human-in-the-loop approval gate.
//!
//! Tags the approver team on the originator, then polls its comments for an
//! authorized approval or rejection. Only comments created strictly after
//! the approval-request comment count; stale signals cannot restart a run.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::platform::{Comment, Platform};
use crate::poll;
use crate::request::MergeRequest;
use tokio_util::sync::CancellationToken;

/// Seconds between comment polls.
const POLL_INTERVAL_SECS: u64 = 60;

/// Keywords accepted as an approval, matched in the lowercased body.
const APPROVAL_KEYWORDS: &[&str] = &["approved", "👍"];

/// Keywords accepted as a rejection.
const REJECTION_KEYWORDS: &[&str] = &["rejected", "👎"];

/// Comment authors belonging to the automation itself.
const AUTOMATION_IDENTITIES: &[&str] = &["github-actions", "github-actions[bot]"];

/// Terminal verdict of the approval loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalVerdict {
    Approved { approver: String },
    Rejected { rejector: String },
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Approval,
    Rejection,
}

/// Classify a comment body. Approval keywords win when both appear.
fn classify(body: &str) -> Option<Signal> {
    let lower = body.to_lowercase();
    if APPROVAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Some(Signal::Approval)
    } else if REJECTION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Some(Signal::Rejection)
    } else {
        None
    }
}

fn is_automation(author: &str) -> bool {
    AUTOMATION_IDENTITIES.contains(&author)
}

/// Polls the originator for an authorized verdict, with reminders.
pub struct ApprovalController<'a> {
    platform: &'a dyn Platform,
    config: &'a Config,
    warned_approvals: HashSet<(String, u64)>,
    warned_rejections: HashSet<(String, u64)>,
}

impl<'a> ApprovalController<'a> {
    pub fn new(platform: &'a dyn Platform, config: &'a Config) -> Self {
        Self {
            platform,
            config,
            warned_approvals: HashSet::new(),
            warned_rejections: HashSet::new(),
        }
    }

    /// Request approval and wait for an authorized verdict.
    ///
    /// # Errors
    ///
    /// Fails when the approval-request comment cannot be posted or the run
    /// is cancelled mid-wait.
    pub async fn await_decision(
        &mut self,
        request: &MergeRequest,
        cancel: &CancellationToken,
    ) -> Result<ApprovalVerdict> {
        let originator = request.originator;
        let team = &self.config.approver_team;

        // Resolve membership once; the cached list authorizes verdicts for
        // the whole cycle.
        let members = match self.platform.get_team_members(team).await {
            Ok(members) => {
                info!(team = %team, count = members.len(), "resolved approver team members");
                members
            }
            Err(err) => {
                warn!(team = %team, error = %err, "could not resolve team members, will fall back to membership checks");
                Vec::new()
            }
        };
        let member_tags = if members.is_empty() {
            format!("@{}/{}", self.config.org(), team)
        } else {
            members
                .iter()
                .map(|m| format!("@{m}"))
                .collect::<Vec<_>>()
                .join(" ")
        };

        let trigger = self
            .platform
            .add_comment(
                originator,
                &self.approval_request_message(request, &member_tags),
            )
            .await
            .context("failed to post approval request")?;
        info!(
            originator,
            trigger = %trigger.created_at,
            "approval requested, waiting for verdict"
        );

        let timeout_minutes = self.config.approval_timeout_minutes;
        let reminder_interval = self.config.approval_reminder_interval_minutes;
        let mut elapsed_minutes: u64 = 0;

        while elapsed_minutes < timeout_minutes {
            let comments = match self
                .platform
                .list_comments_after(originator, trigger.created_at)
                .await
            {
                Ok(comments) => comments,
                Err(err) => {
                    warn!(originator, error = %err, "failed to list comments");
                    Vec::new()
                }
            };

            for comment in &comments {
                if is_automation(&comment.author) {
                    continue;
                }
                match classify(&comment.body) {
                    Some(Signal::Approval) => {
                        if self.is_authorized(&comment.author, &members).await {
                            info!(originator, approver = %comment.author, "approval received");
                            self.post_best_effort(
                                originator,
                                &self.approval_confirmation(&comment.author),
                            )
                            .await;
                            return Ok(ApprovalVerdict::Approved {
                                approver: comment.author.clone(),
                            });
                        }
                        self.warn_unauthorized(originator, comment, Signal::Approval, &members)
                            .await;
                    }
                    Some(Signal::Rejection) => {
                        if self.is_authorized(&comment.author, &members).await {
                            info!(originator, rejector = %comment.author, "rejection received");
                            self.post_best_effort(
                                originator,
                                &self.rejection_confirmation(&comment.author),
                            )
                            .await;
                            return Ok(ApprovalVerdict::Rejected {
                                rejector: comment.author.clone(),
                            });
                        }
                        self.warn_unauthorized(originator, comment, Signal::Rejection, &members)
                            .await;
                    }
                    None => {}
                }
            }

            if elapsed_minutes > 0 && elapsed_minutes % reminder_interval == 0 {
                let remaining = timeout_minutes - elapsed_minutes;
                self.post_best_effort(originator, &reminder_message(&member_tags, remaining))
                    .await;
                info!(originator, remaining, "sent approval reminder");
            }

            poll::idle(Duration::from_secs(POLL_INTERVAL_SECS), cancel).await?;
            elapsed_minutes += 1;
        }

        warn!(originator, timeout_minutes, "approval timed out");
        self.post_best_effort(originator, &timeout_message(timeout_minutes))
            .await;
        Ok(ApprovalVerdict::TimedOut)
    }

    async fn is_authorized(&self, author: &str, members: &[String]) -> bool {
        if !members.is_empty() {
            return members.iter().any(|m| m == author);
        }
        // Membership list unavailable; ask the platform directly.
        match self
            .platform
            .is_team_member(author, &self.config.approver_team)
            .await
        {
            Ok(is_member) => is_member,
            Err(err) => {
                warn!(author, error = %err, "membership check failed, treating as unauthorized");
                false
            }
        }
    }

    /// Post a one-time warning for an unauthorized verdict attempt,
    /// deduplicated by `(author, comment id)`.
    async fn warn_unauthorized(
        &mut self,
        originator: u64,
        comment: &Comment,
        signal: Signal,
        members: &[String],
    ) {
        let key = (comment.author.clone(), comment.id);
        let warned = match signal {
            Signal::Approval => &mut self.warned_approvals,
            Signal::Rejection => &mut self.warned_rejections,
        };
        if warned.contains(&key) {
            return;
        }

        let (verb, noun) = match signal {
            Signal::Approval => ("approve", "Approval"),
            Signal::Rejection => ("reject", "Rejection"),
        };
        warn!(
            originator,
            author = %comment.author,
            comment_id = comment.id,
            "unauthorized {} attempt",
            verb
        );

        let team = &self.config.approver_team;
        let mut message = format!(
            "⚠️ **Unauthorized {noun} Attempt**\n\n\
             @{} attempted to {verb} this request, but is not a member of the `{team}` team.\n\n\
             **Required**: {noun} must come from a member of the `{team}` team.",
            comment.author,
        );
        if !members.is_empty() {
            let tags = members
                .iter()
                .map(|m| format!("@{m}"))
                .collect::<Vec<_>>()
                .join(", ");
            message.push_str(&format!("\n**Current team members**: {tags}"));
        }

        if let Err(err) = self.platform.add_comment(originator, &message).await {
            warn!(originator, error = %err, "failed to post unauthorized-attempt warning");
        } else {
            warned.insert(key);
        }
    }

    async fn post_best_effort(&self, originator: u64, body: &str) {
        if let Err(err) = self.platform.add_comment(originator, body).await {
            warn!(originator, error = %err, "failed to post comment");
        }
    }

    fn approval_request_message(&self, request: &MergeRequest, member_tags: &str) -> String {
        let release_info = request
            .release_pr
            .map_or_else(String::new, |n| format!("\n• **Release PR**: #{n}"));
        format!(
            "{member_tags} 🚀 **Merge Queue Approval Requested**\n\n\
             **Requested by**: @{}\n\
             **PR Numbers**: {}{release_info}\n\n\
             **Action Required**: Please review the PRs and approve this merge queue request.\n\n\
             ⏰ **Timeout**: This request will timeout in {} minutes if not approved.\n\
             📋 **Reminders**: You'll receive reminders every {} minutes.\n\n\
             **To approve**: React with 👍 to this comment or reply with 'approved'\n\
             **To reject**: React with 👎 to this comment or reply with 'rejected'\n\n\
             *This is an automated merge queue approval request.*",
            request.submitter,
            request.candidates_csv(),
            self.config.approval_timeout_minutes,
            self.config.approval_reminder_interval_minutes,
        )
    }

    fn approval_confirmation(&self, approver: &str) -> String {
        format!(
            "✅ **Approved by @{approver}**\n\n\
             ✅ **Authorization Verified**: Member of `{}` team\n\n\
             The merge queue workflow will now execute automatically.\n\n\
             Monitor the progress: [Actions tab](https://github.com/{}/actions)",
            self.config.approver_team, self.config.repository,
        )
    }

    fn rejection_confirmation(&self, rejector: &str) -> String {
        format!(
            "❌ **Rejected by @{rejector}**\n\n\
             ✅ **Authorization Verified**: Member of `{}` team\n\n\
             The merge queue request has been rejected. Please address any concerns \
             and comment `begin-merge` again to restart the process.",
            self.config.approver_team,
        )
    }
}

fn reminder_message(member_tags: &str, remaining_minutes: u64) -> String {
    format!(
        "⏰ **Reminder**: Merge queue approval still pending\n\n\
         {member_tags} - Please review and approve this merge request.\n\n\
         **Time remaining**: {remaining_minutes} minutes\n\
         **To approve**: Reply with 'approved'\n\
         **To reject**: Reply with 'rejected'"
    )
}

fn timeout_message(timeout_minutes: u64) -> String {
    format!(
        "⏰ **Approval Timeout**\n\n\
         No approval was received within {timeout_minutes} minutes. The merge queue request has timed out.\n\n\
         **To restart**: Comment `begin-merge` again to start a new approval process."
    )
}
