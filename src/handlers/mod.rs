//! Resource controllers.
//!
//! Every handler runs the same pipeline and stops at the first failure:
//! authenticate (middleware), validate the payload shape, resolve referenced
//! records, consult the authorization gate, persist, serialize.

use crate::{
    auth::AuthUser,
    error::ApiError,
    models::Unit,
    policy::{Decision, UnitContext, UnitRole},
    repository::RepositoryState,
};

pub mod numbas;
pub mod projects;
pub mod students;
pub mod tasks;
pub mod test_attempts;
pub mod tutorials;

/// Turns a gate decision into a 403.
pub(crate) fn ensure(decision: Decision) -> Result<(), ApiError> {
    match decision {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(ApiError::Forbidden(reason)),
    }
}

/// unit_context
///
/// Collects what the gate needs to know about the caller's relationship with
/// `unit`: staff role (if any) and whether they own an enrolled project there.
pub(crate) async fn unit_context(
    repo: &RepositoryState,
    unit: &Unit,
    user: &AuthUser,
) -> Result<UnitContext, ApiError> {
    let actor_unit_role = repo
        .get_unit_role(unit.id, user.id)
        .await?
        .as_deref()
        .and_then(UnitRole::parse);
    let actor_enrolled = repo.is_enrolled(unit.id, user.id).await?;

    Ok(UnitContext {
        unit_id: unit.id,
        main_convenor_id: unit.main_convenor_id,
        actor_unit_role,
        actor_enrolled,
    })
}

/// Loads a unit by id, reporting a missing reference when absent.
pub(crate) async fn find_unit(repo: &RepositoryState, unit_id: i64) -> Result<Unit, ApiError> {
    repo.get_unit(unit_id)
        .await?
        .ok_or(ApiError::MissingReference("Unit"))
}
