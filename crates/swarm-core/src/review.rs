use serde::{Deserialize, Serialize};

/// One problem raised by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// File the issue is in.
    pub file: String,
    /// Line number, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// What is wrong.
    pub issue: String,
    /// How to fix it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Structured outcome of reviewing a worker's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewVerdict {
    /// The work is accepted.
    Approved {
        /// Reviewer notes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// The worker must address `issues`.
    NeedsChanges {
        /// Problems to fix.
        #[serde(default)]
        issues: Vec<ReviewIssue>,
        /// Reviewer notes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl ReviewVerdict {
    /// Approval with a summary.
    pub fn approved(summary: impl Into<String>) -> Self {
        ReviewVerdict::Approved {
            summary: Some(summary.into()),
        }
    }

    /// Rejection listing `issues`.
    pub fn needs_changes(issues: Vec<ReviewIssue>) -> Self {
        ReviewVerdict::NeedsChanges {
            issues,
            summary: None,
        }
    }

    /// Whether the work was accepted.
    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewVerdict::Approved { .. })
    }

    /// Reviewer summary, if any.
    pub fn summary(&self) -> Option<&str> {
        match self {
            ReviewVerdict::Approved { summary } | ReviewVerdict::NeedsChanges { summary, .. } => {
                summary.as_deref()
            }
        }
    }

    /// Human-readable body used when the verdict is delivered as a message.
    pub fn render(&self) -> String {
        match self {
            ReviewVerdict::Approved { summary } => match summary {
                Some(s) => format!("Approved: {s}"),
                None => "Approved".to_string(),
            },
            ReviewVerdict::NeedsChanges { issues, summary } => {
                let mut out = String::from("Changes requested");
                if let Some(s) = summary {
                    out.push_str(": ");
                    out.push_str(s);
                }
                for issue in issues {
                    out.push_str("\n- ");
                    out.push_str(&issue.file);
                    if let Some(line) = issue.line {
                        out.push_str(&format!(":{line}"));
                    }
                    out.push_str(": ");
                    out.push_str(&issue.issue);
                    if let Some(s) = &issue.suggestion {
                        out.push_str(&format!(" (suggestion: {s})"));
                    }
                }
                out
            }
        }
    }
}
