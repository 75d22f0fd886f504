//! Per-event access decisions

use crate::auth::claims::{ClaimSet, Role};
use crate::events::EventEnvelope;

/// Decide whether `claims` may see `event`
///
/// The contest check runs before any role rule, so no role ever sees another
/// contest's solutions.
pub fn permits(claims: &ClaimSet, event: &EventEnvelope) -> bool {
    if claims.scope_id != event.solution.contest_id {
        return false;
    }

    match claims.role {
        Role::Student => claims.subject_id == event.solution.user_id,
        Role::Teacher | Role::Admin => true,
        Role::Guest | Role::Unrecognized(_) => false,
    }
}
