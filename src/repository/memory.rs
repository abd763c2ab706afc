use super::{RepoError, RepoResult, Repository, TutorialDeletion, unique_message};
use crate::models::{
    Campus, EnrolmentSummary, Group, NewTestAttempt, NewTutorial, Project, ProjectChanges,
    ProjectDetails, ProjectRow, StudentIdentity, SubTask, SubTaskDefinition, SubTaskRow, Task,
    TaskDefinition, TaskDetails, TaskRow, TaskStatus, TestAttempt, TestAttemptChanges, Tutorial,
    TutorialChanges, TutorialDetails, TutorialEnrolment, Unit, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Store {
    next_id: i64,
    users: BTreeMap<i64, User>,
    units: BTreeMap<i64, Unit>,
    unit_roles: Vec<(i64, i64, String)>,
    campuses: BTreeMap<i64, Campus>,
    tutorials: BTreeMap<i64, Tutorial>,
    enrolments: BTreeMap<i64, TutorialEnrolment>,
    projects: BTreeMap<i64, Project>,
    groups: BTreeMap<i64, Group>,
    memberships: Vec<(i64, i64, bool)>,
    task_definitions: BTreeMap<i64, TaskDefinition>,
    sub_task_definitions: BTreeMap<i64, SubTaskDefinition>,
    tasks: BTreeMap<i64, Task>,
    sub_tasks: BTreeMap<i64, SubTask>,
    test_attempts: BTreeMap<i64, TestAttempt>,
}

impl Store {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tutorial_details(&self, tutorial: &Tutorial) -> TutorialDetails {
        let tutor = self.users.get(&tutorial.tutor_id).cloned().unwrap_or_default();
        let num_students = self
            .enrolments
            .values()
            .filter(|e| e.tutorial_id == tutorial.id)
            .count() as i64;
        TutorialDetails {
            tutorial: tutorial.clone(),
            tutor_first_name: tutor.first_name,
            tutor_last_name: tutor.last_name,
            tutor_nickname: tutor.nickname,
            num_students,
        }
    }

    fn abbreviation_taken(&self, unit_id: i64, abbreviation: &str, except: Option<i64>) -> bool {
        self.tutorials.values().any(|t| {
            t.unit_id == unit_id && t.abbreviation == abbreviation && Some(t.id) != except
        })
    }

    fn project_row(&self, project: &Project) -> ProjectRow {
        let user = self.users.get(&project.student_id).cloned().unwrap_or_default();
        ProjectRow {
            project: project.clone(),
            student: StudentIdentity {
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
                nickname: user.nickname,
                email: user.email,
            },
        }
    }

    fn task_row(&self, task: &Task) -> Option<TaskRow> {
        let definition = self.task_definitions.get(&task.task_definition_id)?;
        let project = self.projects.get(&task.project_id)?;
        Some(TaskRow {
            task: task.clone(),
            definition_name: definition.name.clone(),
            definition_abbreviation: definition.abbreviation.clone(),
            unit_id: project.unit_id,
            student_id: project.student_id,
        })
    }

    fn task_details(&self, id: i64) -> Option<TaskDetails> {
        let task = self.task_row(self.tasks.get(&id)?)?;
        let mut sub_tasks: Vec<SubTaskRow> = self
            .sub_tasks
            .values()
            .filter(|s| s.task_id == id)
            .filter_map(|s| {
                let definition = self.sub_task_definitions.get(&s.sub_task_definition_id)?;
                Some(SubTaskRow {
                    id: s.id,
                    task_id: s.task_id,
                    sub_task_definition_id: s.sub_task_definition_id,
                    name: definition.name.clone(),
                    position: definition.position,
                    completion_date: s.completion_date,
                    updated_at: s.updated_at,
                })
            })
            .collect();
        sub_tasks.sort_by_key(|s| (s.position, s.id));
        Some(TaskDetails { task, sub_tasks })
    }

    fn project_details(&self, id: i64) -> Option<ProjectDetails> {
        let project = self.projects.get(&id)?;

        let mut tasks: Vec<TaskRow> = self
            .tasks
            .values()
            .filter(|t| t.project_id == id)
            .filter_map(|t| self.task_row(t))
            .collect();
        tasks.sort_by(|a, b| {
            (a.definition_abbreviation.as_str(), a.task.id)
                .cmp(&(b.definition_abbreviation.as_str(), b.task.id))
        });

        let tutorial_enrolments = self
            .enrolments
            .values()
            .filter(|e| e.project_id == id)
            .map(|e| EnrolmentSummary {
                id: e.id,
                tutorial_id: e.tutorial_id,
                abbreviation: self
                    .tutorials
                    .get(&e.tutorial_id)
                    .map(|t| t.abbreviation.clone())
                    .unwrap_or_default(),
                created_at: e.created_at,
            })
            .collect();

        let mut groups: Vec<Group> = self
            .memberships
            .iter()
            .filter(|(_, project_id, active)| *project_id == id && *active)
            .filter_map(|(group_id, _, _)| self.groups.get(group_id).cloned())
            .collect();
        groups.sort_by(|a, b| (a.name.as_str(), a.id).cmp(&(b.name.as_str(), b.id)));

        Some(ProjectDetails {
            project: self.project_row(project),
            tasks,
            tutorial_enrolments,
            groups,
        })
    }

    fn attempts_for(&self, task_id: Option<i64>) -> impl Iterator<Item = &TestAttempt> {
        self.test_attempts
            .values()
            .filter(move |a| task_id.is_none() || a.task_id == task_id)
    }
}

/// InMemoryRepository
///
/// `Repository` kept entirely in process memory. Backs the router tests and the
/// spawned-server tests; the binary always runs against Postgres. Uniqueness
/// rules mirror the Postgres constraints so both report the same validation
/// failures.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Seeding ---

    pub fn insert_user(&self, username: &str, first_name: &str, last_name: &str, role: &str) -> User {
        let mut store = self.store();
        let id = store.allocate();
        let user = User {
            id,
            username: username.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            nickname: None,
            email: format!("{username}@example.edu"),
            role: role.to_string(),
        };
        store.users.insert(id, user.clone());
        user
    }

    pub fn insert_unit(&self, code: &str, name: &str, main_convenor_id: i64) -> Unit {
        let mut store = self.store();
        let id = store.allocate();
        let unit = Unit {
            id,
            code: code.to_string(),
            name: name.to_string(),
            main_convenor_id,
        };
        store.units.insert(id, unit.clone());
        store
            .unit_roles
            .push((id, main_convenor_id, "convenor".to_string()));
        unit
    }

    pub fn add_unit_role(&self, unit_id: i64, user_id: i64, role: &str) {
        let mut store = self.store();
        store
            .unit_roles
            .retain(|(u, member, _)| !(*u == unit_id && *member == user_id));
        store.unit_roles.push((unit_id, user_id, role.to_string()));
    }

    pub fn insert_campus(&self, name: &str, abbreviation: &str) -> Campus {
        let mut store = self.store();
        let id = store.allocate();
        let campus = Campus {
            id,
            name: name.to_string(),
            abbreviation: abbreviation.to_string(),
        };
        store.campuses.insert(id, campus.clone());
        campus
    }

    pub fn insert_project(&self, unit_id: i64, student_id: i64, enrolled: bool) -> Project {
        let mut store = self.store();
        let id = store.allocate();
        let project = Project {
            id,
            unit_id,
            student_id,
            enrolled,
            ..Default::default()
        };
        store.projects.insert(id, project.clone());
        project
    }

    /// Adds a task definition with one sub-task definition per entry of `sub_tasks`,
    /// positioned in the given order.
    pub fn insert_task_definition(
        &self,
        unit_id: i64,
        name: &str,
        abbreviation: &str,
        sub_tasks: &[&str],
    ) -> TaskDefinition {
        let mut store = self.store();
        let id = store.allocate();
        let definition = TaskDefinition {
            id,
            unit_id,
            name: name.to_string(),
            abbreviation: abbreviation.to_string(),
        };
        store.task_definitions.insert(id, definition.clone());
        for (position, sub_name) in sub_tasks.iter().enumerate() {
            let sub_id = store.allocate();
            store.sub_task_definitions.insert(
                sub_id,
                SubTaskDefinition {
                    id: sub_id,
                    task_definition_id: id,
                    name: sub_name.to_string(),
                    position: position as i32 + 1,
                },
            );
        }
        definition
    }

    pub fn insert_group(&self, unit_id: i64, name: &str, project_ids: &[i64]) -> Group {
        let mut store = self.store();
        let id = store.allocate();
        let group = Group {
            id,
            unit_id,
            name: name.to_string(),
        };
        store.groups.insert(id, group.clone());
        for project_id in project_ids {
            store.memberships.push((id, *project_id, true));
        }
        group
    }

    pub fn tutorial_count(&self) -> usize {
        self.store().tutorials.len()
    }

    pub fn test_attempt_count(&self) -> usize {
        self.store().test_attempts.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: i64) -> RepoResult<Option<User>> {
        Ok(self.store().users.get(&id).cloned())
    }

    async fn get_unit(&self, id: i64) -> RepoResult<Option<Unit>> {
        Ok(self.store().units.get(&id).cloned())
    }

    async fn get_unit_by_code(&self, code: &str) -> RepoResult<Option<Unit>> {
        Ok(self.store().units.values().find(|u| u.code == code).cloned())
    }

    async fn get_unit_role(&self, unit_id: i64, user_id: i64) -> RepoResult<Option<String>> {
        Ok(self
            .store()
            .unit_roles
            .iter()
            .find(|(u, member, _)| *u == unit_id && *member == user_id)
            .map(|(_, _, role)| role.clone()))
    }

    async fn is_enrolled(&self, unit_id: i64, user_id: i64) -> RepoResult<bool> {
        Ok(self
            .store()
            .projects
            .values()
            .any(|p| p.unit_id == unit_id && p.student_id == user_id && p.enrolled))
    }

    async fn get_campus(&self, id: i64) -> RepoResult<Option<Campus>> {
        Ok(self.store().campuses.get(&id).cloned())
    }

    async fn list_tutorials(&self, unit_id: i64) -> RepoResult<Vec<TutorialDetails>> {
        let store = self.store();
        let mut tutorials: Vec<TutorialDetails> = store
            .tutorials
            .values()
            .filter(|t| t.unit_id == unit_id)
            .map(|t| store.tutorial_details(t))
            .collect();
        tutorials.sort_by(|a, b| {
            (a.tutorial.abbreviation.as_str(), a.tutorial.id)
                .cmp(&(b.tutorial.abbreviation.as_str(), b.tutorial.id))
        });
        Ok(tutorials)
    }

    async fn get_tutorial(&self, id: i64) -> RepoResult<Option<TutorialDetails>> {
        let store = self.store();
        Ok(store.tutorials.get(&id).map(|t| store.tutorial_details(t)))
    }

    async fn create_tutorial(&self, new: NewTutorial) -> RepoResult<TutorialDetails> {
        let mut store = self.store();
        if store.abbreviation_taken(new.unit_id, &new.abbreviation, None) {
            return Err(RepoError::UniqueViolation(unique_message(Some(
                "tutorials_unit_abbreviation_key",
            ))));
        }
        let id = store.allocate();
        let tutorial = Tutorial {
            id,
            unit_id: new.unit_id,
            tutor_id: new.tutor_id,
            campus_id: new.campus_id,
            capacity: new.capacity,
            abbreviation: new.abbreviation,
            meeting_location: new.meeting_location,
            meeting_day: new.meeting_day,
            meeting_time: new.meeting_time,
        };
        let details = store.tutorial_details(&tutorial);
        store.tutorials.insert(id, tutorial);
        Ok(details)
    }

    async fn update_tutorial(
        &self,
        id: i64,
        changes: TutorialChanges,
    ) -> RepoResult<Option<TutorialDetails>> {
        let mut store = self.store();
        let Some(mut tutorial) = store.tutorials.get(&id).cloned() else {
            return Ok(None);
        };

        if let Some(abbreviation) = changes.abbreviation {
            if store.abbreviation_taken(tutorial.unit_id, &abbreviation, Some(id)) {
                return Err(RepoError::UniqueViolation(unique_message(Some(
                    "tutorials_unit_abbreviation_key",
                ))));
            }
            tutorial.abbreviation = abbreviation;
        }
        if let Some(tutor_id) = changes.tutor_id {
            tutorial.tutor_id = tutor_id;
        }
        if let Some(campus_id) = changes.campus_id {
            tutorial.campus_id = campus_id;
        }
        if let Some(capacity) = changes.capacity {
            tutorial.capacity = capacity;
        }
        if let Some(location) = changes.meeting_location {
            tutorial.meeting_location = location;
        }
        if let Some(day) = changes.meeting_day {
            tutorial.meeting_day = day;
        }
        if let Some(time) = changes.meeting_time {
            tutorial.meeting_time = time;
        }

        let details = store.tutorial_details(&tutorial);
        store.tutorials.insert(id, tutorial);
        Ok(Some(details))
    }

    async fn delete_tutorial(&self, id: i64) -> RepoResult<TutorialDeletion> {
        let mut store = self.store();
        if !store.tutorials.contains_key(&id) {
            return Ok(TutorialDeletion::NotFound);
        }
        if store.enrolments.values().any(|e| e.tutorial_id == id) {
            return Ok(TutorialDeletion::HasEnrolments);
        }
        store.tutorials.remove(&id);
        Ok(TutorialDeletion::Deleted)
    }

    async fn enrol_in_tutorial(
        &self,
        tutorial_id: i64,
        project_id: i64,
    ) -> RepoResult<TutorialEnrolment> {
        let mut store = self.store();
        if store
            .enrolments
            .values()
            .any(|e| e.tutorial_id == tutorial_id && e.project_id == project_id)
        {
            return Err(RepoError::UniqueViolation(unique_message(Some(
                "tutorial_enrolments_project_tutorial_key",
            ))));
        }
        let id = store.allocate();
        let enrolment = TutorialEnrolment {
            id,
            project_id,
            tutorial_id,
            created_at: Utc::now(),
        };
        store.enrolments.insert(id, enrolment.clone());
        Ok(enrolment)
    }

    async fn withdraw_from_tutorial(&self, tutorial_id: i64, project_id: i64) -> RepoResult<bool> {
        let mut store = self.store();
        let before = store.enrolments.len();
        store
            .enrolments
            .retain(|_, e| !(e.tutorial_id == tutorial_id && e.project_id == project_id));
        Ok(store.enrolments.len() < before)
    }

    async fn list_students(
        &self,
        unit_id: i64,
        include_withdrawn: bool,
    ) -> RepoResult<Vec<ProjectRow>> {
        let store = self.store();
        let mut rows: Vec<ProjectRow> = store
            .projects
            .values()
            .filter(|p| p.unit_id == unit_id && (include_withdrawn || p.enrolled))
            .map(|p| store.project_row(p))
            .collect();
        rows.sort_by(|a, b| {
            (a.student.last_name.as_str(), a.student.first_name.as_str(), a.project.id).cmp(&(
                b.student.last_name.as_str(),
                b.student.first_name.as_str(),
                b.project.id,
            ))
        });
        Ok(rows)
    }

    async fn find_project(&self, id: i64) -> RepoResult<Option<Project>> {
        Ok(self.store().projects.get(&id).cloned())
    }

    async fn get_project(&self, id: i64) -> RepoResult<Option<ProjectDetails>> {
        Ok(self.store().project_details(id))
    }

    async fn update_project(
        &self,
        id: i64,
        changes: ProjectChanges,
    ) -> RepoResult<Option<ProjectDetails>> {
        let mut store = self.store();
        let Some(project) = store.projects.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(grade) = changes.target_grade {
            project.target_grade = grade;
        }
        if let Some(compile) = changes.compile_portfolio {
            project.compile_portfolio = compile;
        }
        if let Some(draft) = changes.uses_draft_learning_summary {
            project.uses_draft_learning_summary = draft;
        }
        if let Some(enrolled) = changes.enrolled {
            project.enrolled = enrolled;
        }
        if let Some(grade) = changes.submitted_grade {
            project.submitted_grade = Some(grade);
        }
        Ok(store.project_details(id))
    }

    async fn get_task_definition(&self, id: i64) -> RepoResult<Option<TaskDefinition>> {
        Ok(self.store().task_definitions.get(&id).cloned())
    }

    async fn create_task(
        &self,
        project_id: i64,
        task_definition_id: i64,
    ) -> RepoResult<TaskDetails> {
        let mut store = self.store();
        if store
            .tasks
            .values()
            .any(|t| t.project_id == project_id && t.task_definition_id == task_definition_id)
        {
            return Err(RepoError::UniqueViolation(unique_message(Some(
                "tasks_project_definition_key",
            ))));
        }

        let now = Utc::now();
        let task_id = store.allocate();
        store.tasks.insert(
            task_id,
            Task {
                id: task_id,
                project_id,
                task_definition_id,
                status: TaskStatus::NotStarted.as_str().to_string(),
                completion_date: None,
                created_at: now,
            },
        );

        let definitions: Vec<i64> = store
            .sub_task_definitions
            .values()
            .filter(|d| d.task_definition_id == task_definition_id)
            .map(|d| d.id)
            .collect();
        for definition_id in definitions {
            let id = store.allocate();
            store.sub_tasks.insert(
                id,
                SubTask {
                    id,
                    task_id,
                    sub_task_definition_id: definition_id,
                    completion_date: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        store
            .task_details(task_id)
            .ok_or_else(|| RepoError::Database(format!("task {task_id} has no project or definition")))
    }

    async fn get_task(&self, id: i64) -> RepoResult<Option<TaskDetails>> {
        Ok(self.store().task_details(id))
    }

    async fn set_sub_task_completion(
        &self,
        task_id: i64,
        sub_task_id: i64,
        completed: bool,
    ) -> RepoResult<Option<TaskDetails>> {
        let mut store = self.store();
        let now = Utc::now();

        match store.sub_tasks.get_mut(&sub_task_id) {
            Some(sub_task) if sub_task.task_id == task_id => {
                sub_task.completion_date = if completed {
                    sub_task.completion_date.or(Some(now))
                } else {
                    None
                };
                sub_task.updated_at = now;
            }
            _ => return Ok(None),
        }

        let (done, total) = store
            .sub_tasks
            .values()
            .filter(|s| s.task_id == task_id)
            .fold((0, 0), |(done, total), s| {
                (done + usize::from(s.completion_date.is_some()), total + 1)
            });

        let Some(task) = store.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        let next = TaskStatus::parse(&task.status).after_sub_task_change(done, total);
        task.status = next.as_str().to_string();
        task.completion_date = if next == TaskStatus::Complete {
            task.completion_date.or(Some(now))
        } else {
            None
        };

        Ok(store.task_details(task_id))
    }

    async fn list_test_attempts(&self, task_id: Option<i64>) -> RepoResult<Vec<TestAttempt>> {
        Ok(self.store().attempts_for(task_id).cloned().collect())
    }

    async fn latest_test_attempt(
        &self,
        task_id: Option<i64>,
        completed_only: bool,
    ) -> RepoResult<Option<TestAttempt>> {
        Ok(self
            .store()
            .attempts_for(task_id)
            .filter(|a| !completed_only || a.completed)
            .max_by_key(|a| a.id)
            .cloned())
    }

    async fn get_test_attempt(&self, id: i64) -> RepoResult<Option<TestAttempt>> {
        Ok(self.store().test_attempts.get(&id).cloned())
    }

    async fn next_attempt_number(&self, task_id: Option<i64>) -> RepoResult<i32> {
        Ok(self
            .store()
            .attempts_for(task_id)
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0)
            + 1)
    }

    async fn create_test_attempt(&self, new: NewTestAttempt) -> RepoResult<TestAttempt> {
        let mut store = self.store();
        let id = store.allocate();
        let now = Utc::now();
        let attempt = TestAttempt {
            id,
            task_id: new.task_id,
            name: new.name,
            attempt_number: new.attempt_number,
            pass_status: new.pass_status,
            completed: new.completed,
            exam_data: new.exam_data,
            created_at: now,
            updated_at: now,
        };
        store.test_attempts.insert(id, attempt.clone());
        Ok(attempt)
    }

    async fn update_test_attempt(
        &self,
        id: i64,
        changes: TestAttemptChanges,
    ) -> RepoResult<Option<TestAttempt>> {
        let mut store = self.store();
        let Some(attempt) = store.test_attempts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            attempt.name = name;
        }
        if let Some(number) = changes.attempt_number {
            attempt.attempt_number = number;
        }
        if let Some(pass) = changes.pass_status {
            attempt.pass_status = pass;
        }
        if let Some(completed) = changes.completed {
            attempt.completed = completed;
        }
        if let Some(data) = changes.exam_data {
            attempt.exam_data = Some(data);
        }
        attempt.updated_at = Utc::now();
        Ok(Some(attempt.clone()))
    }

    async fn delete_test_attempt(&self, id: i64) -> RepoResult<bool> {
        Ok(self.store().test_attempts.remove(&id).is_some())
    }
}
