//! Pure two-stage transition logic.
//!
//! No I/O anywhere in this module: given the current status, the requested
//! action/stage, and the acting profile, it either produces the next status
//! plus the trail entry to append, or a typed refusal.

use chrono::{DateTime, Utc};

use crate::domain::request::{
    ActorProfile, ApprovalAction, ApprovalStage, ApprovalTrailEntry, RequestStatus,
};
use crate::errors::WorkflowError;

/// Result of a legal transition: the status pair, the trail entry the commit
/// must append, and whether final-approval postings fire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub entry: ApprovalTrailEntry,
    pub triggers_postings: bool,
}

/// Role/stage gate. Runs before any record load so a wrong-role caller
/// costs no I/O. Inactive profiles are refused outright.
pub fn authorize(actor: &ActorProfile, stage: ApprovalStage) -> Result<(), WorkflowError> {
    if !actor.active || !actor.role.can_act_at(stage) {
        return Err(WorkflowError::Forbidden { role: actor.role, stage });
    }
    Ok(())
}

/// Rejections must carry a reason; approvals may.
pub fn validate_note(action: ApprovalAction, note: Option<&str>) -> Result<(), WorkflowError> {
    if action == ApprovalAction::Reject && note.map_or(true, |n| n.trim().is_empty()) {
        return Err(WorkflowError::ValidationFailed(
            "a rejection requires a reason note".to_string(),
        ));
    }
    Ok(())
}

/// The submit edge: `DRAFT -> SUBMITTED`, nothing else.
pub fn submit(current: RequestStatus) -> Result<RequestStatus, WorkflowError> {
    match current {
        RequestStatus::Draft => Ok(RequestStatus::Submitted),
        other => Err(WorkflowError::InvalidState { status: other }),
    }
}

/// The approval/rejection table. Any `(status, stage, action)` combination
/// not listed is an illegal transition.
pub fn transition(
    current: RequestStatus,
    action: ApprovalAction,
    stage: ApprovalStage,
    actor: &ActorProfile,
    note: Option<&str>,
    at: DateTime<Utc>,
) -> Result<TransitionOutcome, WorkflowError> {
    authorize(actor, stage)?;
    validate_note(action, note)?;

    use ApprovalAction::{Approve, Reject};
    use ApprovalStage::{Accountant, Manager};
    use RequestStatus::{ApprovedByAccountant, ApprovedFinal, RejectedByAccountant, RejectedByManager, Submitted};

    let to = match (current, stage, action) {
        (Submitted, Accountant, Approve) => ApprovedByAccountant,
        (Submitted, Accountant, Reject) => RejectedByAccountant,
        (ApprovedByAccountant, Manager, Approve) => ApprovedFinal,
        (ApprovedByAccountant, Manager, Reject) => RejectedByManager,
        _ => return Err(WorkflowError::InvalidState { status: current }),
    };

    let entry = ApprovalTrailEntry {
        action,
        stage,
        by_uid: actor.uid.clone(),
        by_name: actor.display_name.clone(),
        note: note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        at,
    };

    Ok(TransitionOutcome {
        from: current,
        to,
        entry,
        triggers_postings: to == ApprovedFinal,
    })
}
