use thiserror::Error;

use crate::domain::request::{ApprovalStage, RequestStatus, UserRole};

/// Workflow failure taxonomy surfaced to callers. Every variant is typed and
/// returned, never swallowed; `PostingFailed` and `Contention` guarantee the
/// persisted record is unchanged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("action not legal from status {status:?}")]
    InvalidState { status: RequestStatus },
    #[error("role {role:?} may not act at the {stage:?} stage")]
    Forbidden { role: UserRole, stage: ApprovalStage },
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("posting failed: {0}")]
    PostingFailed(String),
    #[error("commit contention persisted after {attempts} attempts")]
    Contention { attempts: u32 },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Store(String),
}

impl WorkflowError {
    /// UI-safe text per failure kind. The caller shows this and leaves the
    /// displayed record untouched until a refetch confirms the new status.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => {
                "This request has already moved on. Refresh to see its current status."
            }
            Self::Forbidden { .. } => "Your role does not permit this approval step.",
            Self::ValidationFailed(_) => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::PostingFailed(_) => {
                "Approval could not be completed because a linked account or stock item is unavailable."
            }
            Self::Contention { .. } => {
                "Someone else is acting on this request right now. Please retry."
            }
            Self::NotFound(_) => "The requested record could not be found.",
            Self::Store(_) => "The service is temporarily unavailable. Please retry shortly.",
        }
    }
}
