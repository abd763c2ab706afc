//! Authorization gate.
//!
//! `authorize` is a pure decision over an actor, an action and a resource scope.
//! Handlers gather the scope (unit membership, ownership) from the repository and
//! then consult the gate; nothing here touches storage.

use std::fmt;

/// System-wide role carried on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Tutor,
    Convenor,
    Admin,
}

impl Role {
    /// Unknown role text is treated as the least privileged role.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "convenor" => Role::Convenor,
            "tutor" => Role::Tutor,
            _ => Role::Student,
        }
    }

    pub fn is_staff(self) -> bool {
        !matches!(self, Role::Student)
    }
}

/// Staff membership within a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRole {
    Tutor,
    Convenor,
}

impl UnitRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tutor" => Some(UnitRole::Tutor),
            "convenor" => Some(UnitRole::Convenor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitRole::Tutor => "tutor",
            UnitRole::Convenor => "convenor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(verb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Tutorial,
    TutorialEnrolment,
    StudentList,
    Project,
    /// Staff-only project columns (enrolment status, submitted grade).
    ProjectGrading,
    Task,
    TestAttempt,
    TestPackage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

/// UnitContext
///
/// What the gate needs to know about the actor's relationship with the unit
/// that owns the target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitContext {
    pub unit_id: i64,
    pub main_convenor_id: i64,
    pub actor_unit_role: Option<UnitRole>,
    pub actor_enrolled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub resource: Resource,
    pub unit: Option<UnitContext>,
    /// User id of the student owning the resource, when it has one.
    pub owner_id: Option<i64>,
}

impl Scope {
    pub fn unit(resource: Resource, unit: UnitContext) -> Self {
        Self {
            resource,
            unit: Some(unit),
            owner_id: None,
        }
    }

    pub fn owned(resource: Resource, unit: UnitContext, owner_id: i64) -> Self {
        Self {
            resource,
            unit: Some(unit),
            owner_id: Some(owner_id),
        }
    }

    pub fn global(resource: Resource) -> Self {
        Self {
            resource,
            unit: None,
            owner_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

fn is_main_convenor(actor: &Actor, unit: &UnitContext) -> bool {
    unit.main_convenor_id == actor.id
}

fn is_unit_staff(actor: &Actor, unit: &UnitContext) -> bool {
    is_main_convenor(actor, unit) || unit.actor_unit_role.is_some()
}

fn is_owner(actor: &Actor, scope: &Scope) -> bool {
    scope.owner_id == Some(actor.id)
}

/// authorize
///
/// Decides whether `actor` may perform `action` on the resource described by
/// `scope`. Admins are always allowed. A unit-scoped resource without a unit
/// context is denied.
pub fn authorize(actor: &Actor, action: Action, scope: &Scope) -> Decision {
    if actor.role == Role::Admin {
        return Decision::Allow;
    }

    let allowed = match (scope.resource, scope.unit.as_ref()) {
        (Resource::TestAttempt, _) => true,
        (Resource::TestPackage, _) => match action {
            Action::Read => true,
            _ => actor.role.is_staff(),
        },
        (_, None) => false,
        (Resource::Tutorial, Some(unit)) => match action {
            Action::Read => is_unit_staff(actor, unit) || unit.actor_enrolled,
            _ => is_main_convenor(actor, unit),
        },
        (Resource::TutorialEnrolment, Some(unit)) => {
            is_unit_staff(actor, unit) || is_owner(actor, scope)
        }
        (Resource::StudentList, Some(unit)) => is_unit_staff(actor, unit),
        (Resource::Project | Resource::Task, Some(unit)) => {
            is_unit_staff(actor, unit) || is_owner(actor, scope)
        }
        (Resource::ProjectGrading, Some(unit)) => is_unit_staff(actor, unit),
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(deny_reason(action, scope.resource))
    }
}

fn deny_reason(action: Action, resource: Resource) -> String {
    match resource {
        Resource::Tutorial => format!("Not authorised to {action} tutorials for this unit"),
        Resource::TutorialEnrolment => {
            format!("Not authorised to {action} tutorial enrolments for this project")
        }
        Resource::StudentList => {
            "You do not have permission to read these student details".to_string()
        }
        Resource::Project => format!("Not authorised to {action} this project"),
        Resource::ProjectGrading => {
            "Only unit staff may change enrolment or submitted grades".to_string()
        }
        Resource::Task => format!("Not authorised to {action} this task"),
        Resource::TestAttempt => format!("Not authorised to {action} test attempts"),
        Resource::TestPackage => "Only staff may upload test packages".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONVENOR: i64 = 1;
    const TUTOR: i64 = 2;
    const STUDENT: i64 = 3;
    const OTHER_STUDENT: i64 = 4;

    fn unit_for(actor_unit_role: Option<UnitRole>, actor_enrolled: bool) -> UnitContext {
        UnitContext {
            unit_id: 10,
            main_convenor_id: CONVENOR,
            actor_unit_role,
            actor_enrolled,
        }
    }

    fn actor(id: i64, role: Role) -> Actor {
        Actor { id, role }
    }

    #[test]
    fn only_main_convenor_or_admin_mutate_tutorials() {
        let scope = Scope::unit(Resource::Tutorial, unit_for(None, false));
        for action in [Action::Create, Action::Update, Action::Delete] {
            assert!(authorize(&actor(CONVENOR, Role::Convenor), action, &scope).is_allowed());
            assert!(authorize(&actor(99, Role::Admin), action, &scope).is_allowed());
        }

        let tutor_scope = Scope::unit(Resource::Tutorial, unit_for(Some(UnitRole::Tutor), false));
        assert!(!authorize(&actor(TUTOR, Role::Tutor), Action::Delete, &tutor_scope).is_allowed());
    }

    #[test]
    fn students_are_denied_mutations_with_reason() {
        let scope = Scope::unit(Resource::Tutorial, unit_for(None, true));
        let decision = authorize(&actor(STUDENT, Role::Student), Action::Delete, &scope);
        assert_eq!(
            decision,
            Decision::Deny("Not authorised to delete tutorials for this unit".to_string())
        );
        assert!(authorize(&actor(STUDENT, Role::Student), Action::Read, &scope).is_allowed());
    }

    #[test]
    fn student_list_is_staff_only() {
        let staff = Scope::unit(Resource::StudentList, unit_for(Some(UnitRole::Tutor), false));
        assert!(authorize(&actor(TUTOR, Role::Tutor), Action::Read, &staff).is_allowed());

        let student = Scope::unit(Resource::StudentList, unit_for(None, true));
        assert!(!authorize(&actor(STUDENT, Role::Student), Action::Read, &student).is_allowed());
    }

    #[test]
    fn projects_are_visible_to_owner_and_staff_only() {
        let unit = unit_for(None, true);
        let own = Scope::owned(Resource::Project, unit, STUDENT);
        assert!(authorize(&actor(STUDENT, Role::Student), Action::Read, &own).is_allowed());

        let theirs = Scope::owned(Resource::Project, unit, OTHER_STUDENT);
        assert!(!authorize(&actor(STUDENT, Role::Student), Action::Read, &theirs).is_allowed());

        let grading = Scope::owned(Resource::ProjectGrading, unit, STUDENT);
        assert!(!authorize(&actor(STUDENT, Role::Student), Action::Update, &grading).is_allowed());
    }

    #[test]
    fn unit_scoped_resource_without_unit_is_denied() {
        let scope = Scope::global(Resource::Tutorial);
        assert!(!authorize(&actor(CONVENOR, Role::Convenor), Action::Read, &scope).is_allowed());
    }

    #[test]
    fn test_packages_upload_requires_staff_role() {
        let scope = Scope::global(Resource::TestPackage);
        assert!(authorize(&actor(STUDENT, Role::Student), Action::Read, &scope).is_allowed());
        assert!(!authorize(&actor(STUDENT, Role::Student), Action::Create, &scope).is_allowed());
        assert!(authorize(&actor(TUTOR, Role::Tutor), Action::Create, &scope).is_allowed());
    }

    #[test]
    fn role_parsing_defaults_to_student() {
        assert_eq!(Role::parse("Admin"), Role::Admin);
        assert_eq!(Role::parse("mystery"), Role::Student);
        assert_eq!(UnitRole::parse("convenor"), Some(UnitRole::Convenor));
        assert_eq!(UnitRole::parse("student"), None);
    }
}
