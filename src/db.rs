use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AiAggregates, AiRecord, AiStudentData, Enrollment, GradeStatus, RawRecord, StatusCount,
    Student,
};

// 12 binds per row keeps each statement well under the Postgres bind limit.
const INSERT_CHUNK: usize = 1000;

#[async_trait]
pub trait RawRecordStore: Send + Sync {
    async fn insert_raw_record(&self, record: &RawRecord) -> Result<i64>;
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn upsert_students(&self, students: &[Student]) -> Result<()>;

    /// Adds missing (course, student) enrollments and returns all of them; existing rows
    /// keep their grade.
    async fn ensure_enrollments(
        &self,
        course_id: i64,
        student_ids: &[i64],
    ) -> Result<Vec<Enrollment>>;
}

#[async_trait]
pub trait AiRecordStore: Send + Sync {
    async fn insert_ai_records(&self, pull_id: Uuid, records: &[AiStudentData]) -> Result<u64>;

    async fn list_ai_records(&self, student_id: Option<i64>) -> Result<Vec<AiRecord>>;

    /// Every record ordered by (student_id, semester).
    async fn ai_records_for_export(&self) -> Result<Vec<AiRecord>>;

    async fn ai_aggregates(&self) -> Result<AiAggregates>;
}

pub trait Store: RawRecordStore + StudentStore + AiRecordStore {}

impl<T: RawRecordStore + StudentStore + AiRecordStore> Store for T {}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const AI_COLUMNS: &str = "id, pull_id, student_id, student_name, major, major_year, subject, \
     course_id, semester, practical, theoretical, total, status, created_at, last_updated";

fn ai_record_from_row(row: &PgRow) -> Result<AiRecord> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<GradeStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(AiRecord {
        id: row.try_get("id")?,
        pull_id: row.try_get("pull_id")?,
        data: AiStudentData {
            student_id: row.try_get("student_id")?,
            student_name: row.try_get("student_name")?,
            major: row.try_get("major")?,
            major_year: row.try_get("major_year")?,
            subject: row.try_get("subject")?,
            course_id: row.try_get("course_id")?,
            semester: row.try_get("semester")?,
            practical: row.try_get("practical")?,
            theoretical: row.try_get("theoretical")?,
            total: row.try_get("total")?,
            status,
        },
        created_at: row.try_get("created_at")?,
        last_updated: row.try_get("last_updated")?,
    })
}

#[async_trait]
impl RawRecordStore for PgStore {
    async fn insert_raw_record(&self, record: &RawRecord) -> Result<i64> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO lms_ingestion.raw_records (source, data_type, payload, fetched_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&record.source)
        .bind(record.data_type.as_str())
        .bind(Json(&record.payload))
        .bind(record.fetched_at)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(id)
    }
}

#[async_trait]
impl StudentStore for PgStore {
    async fn upsert_students(&self, students: &[Student]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for student in students {
            sqlx::query(
                r#"
                INSERT INTO lms_ingestion.students (id, full_name, email, last_access)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE
                SET full_name = EXCLUDED.full_name,
                    email = EXCLUDED.email,
                    last_access = EXCLUDED.last_access
                "#,
            )
            .bind(student.id)
            .bind(&student.full_name)
            .bind(&student.email)
            .bind(student.last_access)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn ensure_enrollments(
        &self,
        course_id: i64,
        student_ids: &[i64],
    ) -> Result<Vec<Enrollment>> {
        let mut tx = self.pool.begin().await?;

        for student_id in student_ids {
            sqlx::query(
                r#"
                INSERT INTO lms_ingestion.enrollments (course_id, student_id)
                VALUES ($1, $2)
                ON CONFLICT (course_id, student_id) DO NOTHING
                "#,
            )
            .bind(course_id)
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        }

        let rows = sqlx::query(
            r#"
            SELECT id, course_id, student_id, current_grade
            FROM lms_ingestion.enrollments
            WHERE course_id = $1 AND student_id = ANY($2)
            ORDER BY id
            "#,
        )
        .bind(course_id)
        .bind(student_ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut enrollments = Vec::with_capacity(rows.len());
        for row in rows {
            enrollments.push(Enrollment {
                id: row.try_get("id")?,
                course_id: row.try_get("course_id")?,
                student_id: row.try_get("student_id")?,
                current_grade: row.try_get("current_grade")?,
            });
        }

        Ok(enrollments)
    }
}

#[async_trait]
impl AiRecordStore for PgStore {
    async fn insert_ai_records(&self, pull_id: Uuid, records: &[AiStudentData]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in records.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO lms_ingestion.ai_student_data \
                 (pull_id, student_id, student_name, major, major_year, subject, course_id, \
                 semester, practical, theoretical, total, status, created_at, last_updated) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(pull_id)
                    .push_bind(record.student_id)
                    .push_bind(record.student_name.as_str())
                    .push_bind(record.major.as_str())
                    .push_bind(record.major_year)
                    .push_bind(record.subject.as_str())
                    .push_bind(record.course_id)
                    .push_bind(record.semester)
                    .push_bind(record.practical)
                    .push_bind(record.theoretical)
                    .push_bind(record.total)
                    .push_bind(record.status.as_str())
                    .push("now()")
                    .push("now()");
            });

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_ai_records(&self, student_id: Option<i64>) -> Result<Vec<AiRecord>> {
        let rows = match student_id {
            Some(id) => {
                sqlx::query(&format!(
                    "SELECT {AI_COLUMNS} FROM lms_ingestion.ai_student_data \
                     WHERE student_id = $1 ORDER BY semester, id"
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {AI_COLUMNS} FROM lms_ingestion.ai_student_data ORDER BY id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(ai_record_from_row).collect()
    }

    async fn ai_records_for_export(&self) -> Result<Vec<AiRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {AI_COLUMNS} FROM lms_ingestion.ai_student_data \
             ORDER BY student_id, semester, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ai_record_from_row).collect()
    }

    async fn ai_aggregates(&self) -> Result<AiAggregates> {
        let totals = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_records,
                   COUNT(DISTINCT student_id) AS unique_students,
                   COUNT(DISTINCT course_id) AS unique_courses,
                   COALESCE(AVG(total), 0)::DOUBLE PRECISION AS average_total
            FROM lms_ingestion.ai_student_data
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let status_rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM lms_ingestion.ai_student_data
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut status_counts = Vec::with_capacity(status_rows.len());
        for row in status_rows {
            status_counts.push(StatusCount {
                status: row.try_get("status")?,
                count: row.try_get("count")?,
            });
        }

        Ok(AiAggregates {
            total_records: totals.try_get("total_records")?,
            unique_students: totals.try_get("unique_students")?,
            unique_courses: totals.try_get("unique_courses")?,
            average_total: totals.try_get("average_total")?,
            status_counts,
        })
    }
}
