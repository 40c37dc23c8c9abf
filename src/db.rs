use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AttendanceMark, AttendanceStatus, Evaluation, Grade, Journal, Lesson, Occurrence,
    ReturnRequest, Student,
};
use crate::store::{JournalStore, RecordSource, StatusUpdate, UpdateOutcome};

const JOURNAL_COLUMNS: &str = "j.id, j.subject_id, j.subject_name, j.class_id, j.teacher_id, \
     j.bimester, j.academic_year, j.status, j.return_comment, j.return_requested_at, \
     j.return_origin, j.revision";

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn small_to_u8(value: i16, field: &str) -> anyhow::Result<u8> {
    u8::try_from(value).with_context(|| format!("{field} out of range: {value}"))
}

fn journal_from_row(row: &PgRow) -> anyhow::Result<Journal> {
    let status: String = row.try_get("status")?;
    let requested_at: Option<DateTime<Utc>> = row.try_get("return_requested_at")?;
    let origin: Option<String> = row.try_get("return_origin")?;

    let return_request = match (requested_at, origin) {
        (Some(requested_at), Some(origin)) => Some(ReturnRequest {
            comment: row.try_get("return_comment")?,
            requested_at,
            origin: origin.parse()?,
        }),
        _ => None,
    };

    Ok(Journal {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        subject_name: row.try_get("subject_name")?,
        class_id: row.try_get("class_id")?,
        teacher_id: row.try_get("teacher_id")?,
        bimester: small_to_u8(row.try_get("bimester")?, "bimester")?,
        academic_year: row.try_get("academic_year")?,
        status: status.parse()?,
        return_request,
        revision: row.try_get("revision")?,
    })
}

/// Postgres-backed record store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl JournalStore for PgStore {
    async fn fetch_journal(&self, id: Uuid) -> anyhow::Result<Option<Journal>> {
        let query = format!("SELECT {JOURNAL_COLUMNS} FROM diario.journals j WHERE j.id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(journal_from_row).transpose()
    }

    async fn update_journal_status(&self, update: &StatusUpdate) -> anyhow::Result<UpdateOutcome> {
        let mut tx = self.pool.begin().await?;
        let request = update.return_request.as_ref();

        let result = sqlx::query(
            r#"
            UPDATE diario.journals
            SET status = $4,
                return_comment = $5,
                return_requested_at = $6,
                return_origin = $7,
                revision = revision + 1
            WHERE id = $1 AND status = $2 AND revision = $3
            "#,
        )
        .bind(update.journal_id)
        .bind(update.expected_status.as_str())
        .bind(update.expected_revision)
        .bind(update.status.as_str())
        .bind(request.and_then(|r| r.comment.clone()))
        .bind(request.map(|r| r.requested_at))
        .bind(request.map(|r| r.origin.as_str()))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(UpdateOutcome::Conflict);
        }

        sqlx::query(
            r#"
            INSERT INTO diario.journal_transitions
            (id, journal_id, action, from_status, to_status, actor_id, actor_role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(update.journal_id)
        .bind(update.action.as_str())
        .bind(update.expected_status.as_str())
        .bind(update.status.as_str())
        .bind(update.actor.id)
        .bind(update.actor.role.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(UpdateOutcome::Applied)
    }
}

impl RecordSource for PgStore {
    async fn fetch_student(&self, id: Uuid) -> anyhow::Result<Option<Student>> {
        let row = sqlx::query("SELECT id, full_name, class_id FROM diario.students WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> anyhow::Result<Student> {
            Ok(Student {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                class_id: row.try_get("class_id")?,
            })
        })
        .transpose()
    }

    async fn fetch_lessons_by_journal(&self, journal_id: Uuid) -> anyhow::Result<Vec<Lesson>> {
        let rows = sqlx::query(
            "SELECT id, journal_id, lesson_date, content, lesson_count \
             FROM diario.lessons WHERE journal_id = $1 ORDER BY lesson_date, id",
        )
        .bind(journal_id)
        .fetch_all(&self.pool)
        .await?;

        let mut lessons = Vec::with_capacity(rows.len());
        for row in rows {
            lessons.push(Lesson {
                id: row.try_get("id")?,
                journal_id: row.try_get("journal_id")?,
                date: row.try_get("lesson_date")?,
                content: row.try_get("content")?,
                lesson_count: small_to_u8(row.try_get("lesson_count")?, "lesson_count")?,
            });
        }
        Ok(lessons)
    }

    async fn fetch_evaluations_by_journal(
        &self,
        journal_id: Uuid,
    ) -> anyhow::Result<Vec<Evaluation>> {
        let rows = sqlx::query(
            "SELECT id, journal_id, bimester, weight, title, evaluation_date \
             FROM diario.evaluations WHERE journal_id = $1 ORDER BY evaluation_date, id",
        )
        .bind(journal_id)
        .fetch_all(&self.pool)
        .await?;

        let mut evaluations = Vec::with_capacity(rows.len());
        for row in rows {
            evaluations.push(Evaluation {
                id: row.try_get("id")?,
                journal_id: row.try_get("journal_id")?,
                bimester: small_to_u8(row.try_get("bimester")?, "bimester")?,
                weight: row.try_get("weight")?,
                title: row.try_get("title")?,
                date: row.try_get("evaluation_date")?,
            });
        }
        Ok(evaluations)
    }

    async fn fetch_grades_by_student(&self, student_id: Uuid) -> anyhow::Result<Vec<Grade>> {
        let rows = sqlx::query(
            "SELECT id, evaluation_id, student_id, value \
             FROM diario.grades WHERE student_id = $1 ORDER BY evaluation_id, id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> anyhow::Result<Grade> {
                Ok(Grade {
                    id: row.try_get("id")?,
                    evaluation_id: row.try_get("evaluation_id")?,
                    student_id: row.try_get("student_id")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn fetch_attendance_by_student(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<AttendanceMark>> {
        let rows = sqlx::query(
            "SELECT id, lesson_id, student_id, sequence, status \
             FROM diario.attendance WHERE student_id = $1 \
             ORDER BY lesson_id, sequence NULLS FIRST, id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut marks = Vec::with_capacity(rows.len());
        for row in rows {
            let sequence: Option<i16> = row.try_get("sequence")?;
            let status: String = row.try_get("status")?;
            marks.push(AttendanceMark {
                id: row.try_get("id")?,
                lesson_id: row.try_get("lesson_id")?,
                student_id: row.try_get("student_id")?,
                sequence: sequence.map(|s| small_to_u8(s, "sequence")).transpose()?,
                status: status.parse()?,
            });
        }
        Ok(marks)
    }

    async fn fetch_journals_by_student_enrollment(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<Journal>> {
        let query = format!(
            "SELECT {JOURNAL_COLUMNS} FROM diario.journals j \
             JOIN diario.students s ON s.class_id = j.class_id \
             WHERE s.id = $1 ORDER BY j.subject_name, j.bimester, j.id"
        );
        let rows = sqlx::query(&query)
            .bind(student_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(journal_from_row).collect()
    }

    async fn fetch_occurrences_by_student(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<Occurrence>> {
        let rows = sqlx::query(
            "SELECT id, student_id, journal_id, description, occurred_at \
             FROM diario.occurrences WHERE student_id = $1 ORDER BY occurred_at, id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> anyhow::Result<Occurrence> {
                Ok(Occurrence {
                    id: row.try_get("id")?,
                    student_id: row.try_get("student_id")?,
                    journal_id: row.try_get("journal_id")?,
                    description: row.try_get("description")?,
                    occurred_at: row.try_get("occurred_at")?,
                })
            })
            .collect()
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let class_id = Uuid::parse_str("6b1f0c3e-8a52-4d0e-9f7d-2f3c8f6a1b10")?;
    let teacher_id = Uuid::parse_str("a3c4e5f6-1b2c-4d3e-8f9a-0b1c2d3e4f50")?;

    let students = vec![
        (
            Uuid::parse_str("5e0b9c2a-7d41-4f6b-a3c8-91d2e4f07a61")?,
            "Ana Beatriz Souza",
        ),
        (
            Uuid::parse_str("b84f1d37-2c95-4e0a-8b7f-6a3d5c19e2f4")?,
            "Lucas Ferreira",
        ),
    ];

    for (id, name) in &students {
        sqlx::query(
            r#"
            INSERT INTO diario.students (id, full_name, class_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET full_name = EXCLUDED.full_name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(class_id)
        .execute(pool)
        .await?;
    }

    let journals = vec![
        (
            Uuid::parse_str("2f7c6e18-94ab-4d53-bc20-7e81a6d3f95c")?,
            "Matemática",
            [(8.0, 2.0), (5.0, 1.0)],
            [true, true, true, false],
        ),
        (
            Uuid::parse_str("e8b7c6d5-4f3e-4a2b-9c1d-0e9f8a7b6c54")?,
            "Português",
            [(6.5, 1.0), (7.0, 1.0)],
            [true, false, false, true],
        ),
    ];

    let first_day = NaiveDate::from_ymd_opt(2026, 2, 9).context("invalid date")?;

    for (journal_id, subject, evaluations, presence) in journals {
        sqlx::query(
            r#"
            INSERT INTO diario.journals
            (id, subject_id, subject_name, class_id, teacher_id, bimester, academic_year)
            VALUES ($1, $2, $3, $4, $5, 1, 2026)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(journal_id)
        .bind(Uuid::new_v4())
        .bind(subject)
        .bind(class_id)
        .bind(teacher_id)
        .execute(pool)
        .await?;

        let existing: i64 =
            sqlx::query("SELECT count(*) AS total FROM diario.lessons WHERE journal_id = $1")
                .bind(journal_id)
                .fetch_one(pool)
                .await?
                .try_get("total")?;
        if existing > 0 {
            continue;
        }

        for (offset, present) in presence.iter().enumerate() {
            let lesson_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO diario.lessons (id, journal_id, lesson_date, content, lesson_count)
                VALUES ($1, $2, $3, $4, 1)
                "#,
            )
            .bind(lesson_id)
            .bind(journal_id)
            .bind(first_day + chrono::Duration::days(offset as i64 * 7))
            .bind(format!("{subject}: aula {}", offset + 1))
            .execute(pool)
            .await?;

            for (index, (student_id, _)) in students.iter().enumerate() {
                let status = if *present || index == 1 {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                };
                sqlx::query(
                    r#"
                    INSERT INTO diario.attendance (id, lesson_id, student_id, sequence, status)
                    VALUES ($1, $2, $3, NULL, $4)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(lesson_id)
                .bind(student_id)
                .bind(status.as_str())
                .execute(pool)
                .await?;
            }
        }

        for (position, (value, weight)) in evaluations.iter().enumerate() {
            let evaluation_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO diario.evaluations
                (id, journal_id, bimester, weight, title, evaluation_date)
                VALUES ($1, $2, 1, $3, $4, $5)
                "#,
            )
            .bind(evaluation_id)
            .bind(journal_id)
            .bind(weight)
            .bind(format!("Avaliação {}", position + 1))
            .bind(first_day + chrono::Duration::days(14 * (position as i64 + 1)))
            .execute(pool)
            .await?;

            for (student_id, _) in &students {
                sqlx::query(
                    r#"
                    INSERT INTO diario.grades (id, evaluation_id, student_id, value)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (evaluation_id, student_id) DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(evaluation_id)
                .bind(student_id)
                .bind(value)
                .execute(pool)
                .await?;
            }
        }
    }

    sqlx::query(
        r#"
        INSERT INTO diario.occurrences (id, student_id, journal_id, description, occurred_at)
        VALUES ($1, $2, NULL, $3, $4)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str("f1e2d3c4-b5a6-4978-8a9b-0c1d2e3f4a5b")?)
    .bind(students[0].0)
    .bind("Chegou atrasada duas vezes na semana")
    .bind(NaiveDate::from_ymd_opt(2026, 3, 2).context("invalid date")?)
    .execute(pool)
    .await?;

    Ok(())
}
