use super::{RepoError, RepoResult, Repository, TutorialDeletion, unique_message};
use crate::models::{
    Campus, EnrolmentSummary, Group, NewTestAttempt, NewTutorial, Project, ProjectChanges,
    ProjectDetails, ProjectRow, SubTaskRow, TaskDefinition, TaskDetails, TaskRow, TaskStatus,
    TestAttempt, TestAttemptChanges, TutorialChanges, TutorialDetails, TutorialEnrolment, Unit,
    User,
};
use async_trait::async_trait;
use sqlx::PgPool;

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return RepoError::UniqueViolation(unique_message(db.constraint()));
            }
        }
        tracing::error!("database error: {:?}", err);
        RepoError::Database(err.to_string())
    }
}

const TUTORIAL_SELECT: &str = r#"
    SELECT
        t.id, t.unit_id, t.tutor_id, t.campus_id, t.capacity, t.abbreviation,
        t.meeting_location, t.meeting_day, t.meeting_time,
        u.first_name AS tutor_first_name,
        u.last_name AS tutor_last_name,
        u.nickname AS tutor_nickname,
        (SELECT COUNT(*) FROM tutorial_enrolments e WHERE e.tutorial_id = t.id) AS num_students
    FROM tutorials t
    JOIN users u ON u.id = t.tutor_id
"#;

const PROJECT_SELECT: &str = r#"
    SELECT
        p.id, p.unit_id, p.student_id, p.campus_id, p.target_grade, p.submitted_grade,
        p.enrolled, p.compile_portfolio, p.portfolio_production_date,
        p.uses_draft_learning_summary,
        u.username, u.first_name, u.last_name, u.nickname, u.email
    FROM projects p
    JOIN users u ON u.id = p.student_id
"#;

const TASK_SELECT: &str = r#"
    SELECT
        t.id, t.project_id, t.task_definition_id, t.status, t.completion_date, t.created_at,
        d.name AS definition_name,
        d.abbreviation AS definition_abbreviation,
        p.unit_id, p.student_id
    FROM tasks t
    JOIN task_definitions d ON d.id = t.task_definition_id
    JOIN projects p ON p.id = t.project_id
"#;

const ATTEMPT_COLUMNS: &str =
    "id, task_id, name, attempt_number, pass_status, completed, exam_data, created_at, updated_at";

/// PostgresRepository
///
/// `Repository` backed by PostgreSQL. Queries are bound at runtime so the crate
/// builds without a live database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn project_row(&self, id: i64) -> RepoResult<Option<ProjectRow>> {
        let sql = format!("{PROJECT_SELECT} WHERE p.id = $1");
        Ok(sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn task_row(&self, id: i64) -> RepoResult<Option<TaskRow>> {
        let sql = format!("{TASK_SELECT} WHERE t.id = $1");
        Ok(sqlx::query_as::<_, TaskRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn sub_task_rows(&self, task_id: i64) -> RepoResult<Vec<SubTaskRow>> {
        Ok(sqlx::query_as::<_, SubTaskRow>(
            r#"
            SELECT s.id, s.task_id, s.sub_task_definition_id, d.name, d.position,
                   s.completion_date, s.updated_at
            FROM sub_tasks s
            JOIN sub_task_definitions d ON d.id = s.sub_task_definition_id
            WHERE s.task_id = $1
            ORDER BY d.position, s.id
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- IDENTITY & UNITS ---

    async fn get_user(&self, id: i64) -> RepoResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, username, first_name, last_name, nickname, email, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_unit(&self, id: i64) -> RepoResult<Option<Unit>> {
        Ok(
            sqlx::query_as::<_, Unit>("SELECT id, code, name, main_convenor_id FROM units WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn get_unit_by_code(&self, code: &str) -> RepoResult<Option<Unit>> {
        Ok(sqlx::query_as::<_, Unit>(
            "SELECT id, code, name, main_convenor_id FROM units WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_unit_role(&self, unit_id: i64, user_id: i64) -> RepoResult<Option<String>> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT role FROM unit_roles WHERE unit_id = $1 AND user_id = $2",
        )
        .bind(unit_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn is_enrolled(&self, unit_id: i64, user_id: i64) -> RepoResult<bool> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM projects WHERE unit_id = $1 AND student_id = $2 AND enrolled)",
        )
        .bind(unit_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn get_campus(&self, id: i64) -> RepoResult<Option<Campus>> {
        Ok(
            sqlx::query_as::<_, Campus>("SELECT id, name, abbreviation FROM campuses WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // --- TUTORIALS ---

    async fn list_tutorials(&self, unit_id: i64) -> RepoResult<Vec<TutorialDetails>> {
        let sql = format!("{TUTORIAL_SELECT} WHERE t.unit_id = $1 ORDER BY t.abbreviation, t.id");
        Ok(sqlx::query_as::<_, TutorialDetails>(&sql)
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_tutorial(&self, id: i64) -> RepoResult<Option<TutorialDetails>> {
        let sql = format!("{TUTORIAL_SELECT} WHERE t.id = $1");
        Ok(sqlx::query_as::<_, TutorialDetails>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_tutorial(&self, new: NewTutorial) -> RepoResult<TutorialDetails> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tutorials
                (unit_id, tutor_id, campus_id, capacity, abbreviation,
                 meeting_location, meeting_day, meeting_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(new.unit_id)
        .bind(new.tutor_id)
        .bind(new.campus_id)
        .bind(new.capacity)
        .bind(&new.abbreviation)
        .bind(&new.meeting_location)
        .bind(&new.meeting_day)
        .bind(new.meeting_time)
        .fetch_one(&self.pool)
        .await?;

        self.get_tutorial(id)
            .await?
            .ok_or_else(|| RepoError::Database(format!("tutorial {id} missing after insert")))
    }

    /// Partial update. The `CASE WHEN` flags distinguish "leave alone" from
    /// "set to NULL" for the nullable columns.
    async fn update_tutorial(
        &self,
        id: i64,
        changes: TutorialChanges,
    ) -> RepoResult<Option<TutorialDetails>> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE tutorials
            SET tutor_id = COALESCE($2, tutor_id),
                campus_id = CASE WHEN $3 THEN $4 ELSE campus_id END,
                capacity = COALESCE($5, capacity),
                abbreviation = COALESCE($6, abbreviation),
                meeting_location = COALESCE($7, meeting_location),
                meeting_day = COALESCE($8, meeting_day),
                meeting_time = CASE WHEN $9 THEN $10 ELSE meeting_time END
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(changes.tutor_id)
        .bind(changes.campus_id.is_some())
        .bind(changes.campus_id.flatten())
        .bind(changes.capacity)
        .bind(changes.abbreviation)
        .bind(changes.meeting_location)
        .bind(changes.meeting_day)
        .bind(changes.meeting_time.is_some())
        .bind(changes.meeting_time.flatten())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(id) => self.get_tutorial(id).await,
            None => Ok(None),
        }
    }

    async fn delete_tutorial(&self, id: i64) -> RepoResult<TutorialDeletion> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM tutorials WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(TutorialDeletion::NotFound);
        }

        let enrolments: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tutorial_enrolments WHERE tutorial_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if enrolments > 0 {
            return Ok(TutorialDeletion::HasEnrolments);
        }

        sqlx::query("DELETE FROM tutorials WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(TutorialDeletion::Deleted)
    }

    async fn enrol_in_tutorial(
        &self,
        tutorial_id: i64,
        project_id: i64,
    ) -> RepoResult<TutorialEnrolment> {
        Ok(sqlx::query_as::<_, TutorialEnrolment>(
            r#"
            INSERT INTO tutorial_enrolments (project_id, tutorial_id)
            VALUES ($1, $2)
            RETURNING id, project_id, tutorial_id, created_at
            "#,
        )
        .bind(project_id)
        .bind(tutorial_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn withdraw_from_tutorial(&self, tutorial_id: i64, project_id: i64) -> RepoResult<bool> {
        let result = sqlx::query(
            "DELETE FROM tutorial_enrolments WHERE tutorial_id = $1 AND project_id = $2",
        )
        .bind(tutorial_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- PROJECTS ---

    async fn list_students(
        &self,
        unit_id: i64,
        include_withdrawn: bool,
    ) -> RepoResult<Vec<ProjectRow>> {
        let sql = format!(
            "{PROJECT_SELECT} WHERE p.unit_id = $1 AND ($2 OR p.enrolled) ORDER BY u.last_name, u.first_name, p.id"
        );
        Ok(sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(unit_id)
            .bind(include_withdrawn)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_project(&self, id: i64) -> RepoResult<Option<Project>> {
        Ok(sqlx::query_as::<_, Project>(
            r#"
            SELECT id, unit_id, student_id, campus_id, target_grade, submitted_grade, enrolled,
                   compile_portfolio, portfolio_production_date, uses_draft_learning_summary
            FROM projects WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// get_project
    ///
    /// Assembles the project with its tasks, tutorial enrolments and active groups.
    async fn get_project(&self, id: i64) -> RepoResult<Option<ProjectDetails>> {
        let Some(project) = self.project_row(id).await? else {
            return Ok(None);
        };

        let task_sql = format!("{TASK_SELECT} WHERE t.project_id = $1 ORDER BY d.abbreviation, t.id");
        let tasks = sqlx::query_as::<_, TaskRow>(&task_sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        let tutorial_enrolments = sqlx::query_as::<_, EnrolmentSummary>(
            r#"
            SELECT e.id, e.tutorial_id, t.abbreviation, e.created_at
            FROM tutorial_enrolments e
            JOIN tutorials t ON t.id = e.tutorial_id
            WHERE e.project_id = $1
            ORDER BY e.created_at, e.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.id, g.unit_id, g.name
            FROM unit_groups g
            JOIN group_memberships m ON m.group_id = g.id
            WHERE m.project_id = $1 AND m.active
            ORDER BY g.name, g.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(ProjectDetails {
            project,
            tasks,
            tutorial_enrolments,
            groups,
        }))
    }

    async fn update_project(
        &self,
        id: i64,
        changes: ProjectChanges,
    ) -> RepoResult<Option<ProjectDetails>> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE projects
            SET target_grade = COALESCE($2, target_grade),
                compile_portfolio = COALESCE($3, compile_portfolio),
                uses_draft_learning_summary = COALESCE($4, uses_draft_learning_summary),
                enrolled = COALESCE($5, enrolled),
                submitted_grade = COALESCE($6, submitted_grade)
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(changes.target_grade)
        .bind(changes.compile_portfolio)
        .bind(changes.uses_draft_learning_summary)
        .bind(changes.enrolled)
        .bind(changes.submitted_grade)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(id) => self.get_project(id).await,
            None => Ok(None),
        }
    }

    // --- TASKS ---

    async fn get_task_definition(&self, id: i64) -> RepoResult<Option<TaskDefinition>> {
        Ok(sqlx::query_as::<_, TaskDefinition>(
            "SELECT id, unit_id, name, abbreviation FROM task_definitions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_task(
        &self,
        project_id: i64,
        task_definition_id: i64,
    ) -> RepoResult<TaskDetails> {
        let mut tx = self.pool.begin().await?;

        let task_id: i64 = sqlx::query_scalar(
            "INSERT INTO tasks (project_id, task_definition_id, status) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(project_id)
        .bind(task_definition_id)
        .bind(TaskStatus::NotStarted.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sub_tasks (task_id, sub_task_definition_id)
            SELECT $1, d.id FROM sub_task_definitions d WHERE d.task_definition_id = $2
            "#,
        )
        .bind(task_id)
        .bind(task_definition_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_task(task_id)
            .await?
            .ok_or_else(|| RepoError::Database(format!("task {task_id} missing after insert")))
    }

    async fn get_task(&self, id: i64) -> RepoResult<Option<TaskDetails>> {
        let Some(task) = self.task_row(id).await? else {
            return Ok(None);
        };
        let sub_tasks = self.sub_task_rows(id).await?;
        Ok(Some(TaskDetails { task, sub_tasks }))
    }

    /// set_sub_task_completion
    ///
    /// Runs in one transaction with the task row locked, so concurrent toggles
    /// on sibling sub-tasks cannot compute the status from stale counts.
    async fn set_sub_task_completion(
        &self,
        task_id: i64,
        sub_task_id: i64,
        completed: bool,
    ) -> RepoResult<Option<TaskDetails>> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM tasks WHERE id = $1 FOR UPDATE")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(status) = status else {
            return Ok(None);
        };

        let touched: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE sub_tasks
            SET completion_date = CASE WHEN $3 THEN COALESCE(completion_date, NOW()) ELSE NULL END,
                updated_at = NOW()
            WHERE id = $2 AND task_id = $1
            RETURNING id
            "#,
        )
        .bind(task_id)
        .bind(sub_task_id)
        .bind(completed)
        .fetch_optional(&mut *tx)
        .await?;
        if touched.is_none() {
            return Ok(None);
        }

        let (done, total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE completion_date IS NOT NULL), COUNT(*)
            FROM sub_tasks WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;

        let next = TaskStatus::parse(&status)
            .after_sub_task_change(usize::try_from(done).unwrap_or(0), usize::try_from(total).unwrap_or(0));

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2,
                completion_date = CASE WHEN $3 THEN COALESCE(completion_date, NOW()) ELSE NULL END
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(next.as_str())
        .bind(next == TaskStatus::Complete)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.get_task(task_id).await
    }

    // --- TEST ATTEMPTS ---

    async fn list_test_attempts(&self, task_id: Option<i64>) -> RepoResult<Vec<TestAttempt>> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM test_attempts WHERE ($1::BIGINT IS NULL OR task_id = $1) ORDER BY id"
        );
        Ok(sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn latest_test_attempt(
        &self,
        task_id: Option<i64>,
        completed_only: bool,
    ) -> RepoResult<Option<TestAttempt>> {
        let sql = format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM test_attempts
            WHERE ($1::BIGINT IS NULL OR task_id = $1) AND (NOT $2 OR completed)
            ORDER BY id DESC
            LIMIT 1
            "#
        );
        Ok(sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(task_id)
            .bind(completed_only)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_test_attempt(&self, id: i64) -> RepoResult<Option<TestAttempt>> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM test_attempts WHERE id = $1");
        Ok(sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn next_attempt_number(&self, task_id: Option<i64>) -> RepoResult<i32> {
        Ok(sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(attempt_number), 0) + 1 FROM test_attempts WHERE ($1::BIGINT IS NULL OR task_id = $1)",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn create_test_attempt(&self, new: NewTestAttempt) -> RepoResult<TestAttempt> {
        let sql = format!(
            r#"
            INSERT INTO test_attempts (task_id, name, attempt_number, pass_status, completed, exam_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(new.task_id)
            .bind(new.name)
            .bind(new.attempt_number)
            .bind(new.pass_status)
            .bind(new.completed)
            .bind(new.exam_data)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_test_attempt(
        &self,
        id: i64,
        changes: TestAttemptChanges,
    ) -> RepoResult<Option<TestAttempt>> {
        let sql = format!(
            r#"
            UPDATE test_attempts
            SET name = COALESCE($2, name),
                attempt_number = COALESCE($3, attempt_number),
                pass_status = COALESCE($4, pass_status),
                completed = COALESCE($5, completed),
                exam_data = COALESCE($6, exam_data),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(id)
            .bind(changes.name)
            .bind(changes.attempt_number)
            .bind(changes.pass_status)
            .bind(changes.completed)
            .bind(changes.exam_data)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_test_attempt(&self, id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM test_attempts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
