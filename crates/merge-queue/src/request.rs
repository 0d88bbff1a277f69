//! Originator-body parsing.
//!
//! The originating issue carries the merge request either as an issue-form
//! body (markdown section headers) or as legacy `Key: value` lines. Both
//! forms are accepted; placeholder sentinels mean "field absent".

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::warn;

/// Issue-form placeholder for an empty optional field.
const NO_RESPONSE_SENTINEL: &str = "_No response_";

/// A parsed merge request. Built once per cycle, then read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// The originating issue.
    pub originator: u64,
    /// Username that raised the originator.
    pub submitter: String,
    /// Candidate PR numbers, deduplicated and ascending.
    pub candidates: Vec<u64>,
    /// Optional release PR, merged last with a merge commit.
    pub release_pr: Option<u64>,
    /// Optional required-approvals override.
    pub approvals_override: Option<u32>,
}

/// Why the originator body could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Could not extract PR numbers from the issue. Please ensure the PR Numbers field is properly filled.")]
    MissingPrNumbers,
}

impl MergeRequest {
    /// Parse an originator body into a request.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::MissingPrNumbers`] when the PR Numbers field
    /// is absent, empty, or not a comma/whitespace-separated number list.
    pub fn parse(originator: u64, submitter: &str, body: &str) -> Result<Self, ExtractError> {
        let lines: Vec<&str> = body.lines().collect();

        let pr_field = field_value(&lines, "### PR Numbers", "PR Numbers");
        let release_field = field_value(&lines, "### Release PR (Optional)", "Release PR");
        let override_field = field_value(
            &lines,
            "### Required Approvals Override (Optional)",
            "Required Approvals Override",
        );

        let candidates = match pr_field {
            Some(raw) => parse_number_list(&raw).ok_or(ExtractError::MissingPrNumbers)?,
            None => return Err(ExtractError::MissingPrNumbers),
        };
        if candidates.is_empty() {
            return Err(ExtractError::MissingPrNumbers);
        }

        let release_pr = release_field.and_then(|raw| match raw.parse::<u64>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!(value = %raw, "ignoring non-numeric release PR field");
                None
            }
        });

        let approvals_override = override_field.and_then(|raw| match raw.parse::<i64>() {
            Ok(n) if n > 0 => u32::try_from(n).ok(),
            Ok(n) => {
                warn!(value = n, "ignoring non-positive approvals override");
                None
            }
            Err(_) => {
                warn!(value = %raw, "ignoring non-numeric approvals override");
                None
            }
        });

        Ok(Self {
            originator,
            submitter: submitter.to_string(),
            candidates,
            release_pr,
            approvals_override,
        })
    }

    /// Comma-separated candidate list for comments and issue bodies.
    #[must_use]
    pub fn candidates_csv(&self) -> String {
        self.candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The error comment posted on the originator when extraction fails.
#[must_use]
pub fn extraction_error_comment(error: &ExtractError) -> String {
    format!(
        "❌ **Error**: {error}\n\n\
         **Common Issues:**\n\
         • Make sure the PR Numbers field is filled with comma-separated numbers (e.g., `123,124,125`)\n\
         • Ensure you're using the correct issue template\n\
         • Check that all required fields are properly completed\n\n\
         **To Fix**: Edit the issue description or create a new issue with the correct information."
    )
}

/// Extract a field, trying the issue-form section header first and the
/// legacy `Key: value` line second.
fn field_value(lines: &[&str], header: &str, legacy_key: &str) -> Option<String> {
    section_value(lines, header)
        .or_else(|| legacy_value(lines, legacy_key))
        .filter(|v| !is_sentinel(v))
}

/// Value of an issue-form section: the first non-empty line after the
/// header that is not another section header or the no-response sentinel.
fn section_value(lines: &[&str], header: &str) -> Option<String> {
    let start = lines.iter().position(|l| l.trim() == header)?;
    for line in lines.iter().skip(start + 1).take(9) {
        let value = line.trim();
        if value.is_empty() {
            continue;
        }
        if value.starts_with("###") || value == NO_RESPONSE_SENTINEL {
            return None;
        }
        return Some(clean_value(value));
    }
    None
}

/// Value of a legacy `Key: value` line.
fn legacy_value(lines: &[&str], key: &str) -> Option<String> {
    let prefix = format!("{key}:");
    lines.iter().find_map(|line| {
        line.trim()
            .strip_prefix(&prefix)
            .map(|rest| clean_value(rest.trim()))
    })
}

/// Strip inline markdown decoration from a field value.
fn clean_value(value: &str) -> String {
    value
        .replace(['`', '*', '_'], "")
        .trim()
        .to_string()
}

fn is_sentinel(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

/// Parse a comma/whitespace-separated number list; `None` when any token
/// is not a digit string. Duplicates collapse, order is ascending.
fn parse_number_list(raw: &str) -> Option<Vec<u64>> {
    let mut numbers = BTreeSet::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        if !token.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        numbers.insert(token.parse::<u64>().ok()?);
    }
    Some(numbers.into_iter().collect())
}
