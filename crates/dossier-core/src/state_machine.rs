//! Plan status state machine
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    ▲                   │  │
//!    └─────release───────┘  └──▶ failed
//!    ▲                                │
//!    └──────────requeue (operator)────┘  (also from completed)
//! ```

use crate::error::DossierError;
use crate::types::{PlanId, PlanStatus};

/// Validates a status transition for `plan_id`.
///
/// # Errors
/// Returns [`DossierError::IllegalTransition`] if `to` is not reachable from `from`
pub fn validate_transition(
    plan_id: &PlanId,
    from: PlanStatus,
    to: PlanStatus,
) -> Result<(), DossierError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(DossierError::IllegalTransition {
            plan_id: plan_id.clone(),
            from,
            to,
        })
    }
}

#[must_use]
pub fn allowed_transitions(from: PlanStatus) -> Vec<PlanStatus> {
    use PlanStatus::{Completed, Failed, Pending, Processing};
    match from {
        Pending => vec![Processing],
        Processing => vec![Completed, Failed, Pending],
        Completed | Failed => vec![Pending],
    }
}

/// Statuses an operator may requeue from
#[inline]
#[must_use]
pub fn is_requeueable(status: PlanStatus) -> bool {
    matches!(status, PlanStatus::Failed | PlanStatus::Completed)
}

fn allowed(from: PlanStatus, to: PlanStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
