use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::gate::ProfileDirectory;
use crate::models::{ClassroomAggregate, ClassroomRef, Profile, ProgressFilter, ProgressRecord, UserRole};
use crate::service::ProgressSource;
use crate::store::AggregateStore;

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    tracing::info!(max_connections, "connecting to primary database");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// The analytics pool connects on first use so an unreachable store
/// surfaces as a write-time error instead of blocking startup.
pub fn create_lazy_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(database_url)
        .context("invalid ANALYTICS_DATABASE_URL")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations/primary").run(pool).await?;
    Ok(())
}

pub async fn init_analytics(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations/analytics").run(pool).await?;
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Profile and progress reads against the classroom database.
#[derive(Clone)]
pub struct PrimaryDb {
    pool: PgPool,
}

impl PrimaryDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileDirectory for PrimaryDb {
    async fn profile(&self, user_id: Uuid) -> anyhow::Result<Option<Profile>> {
        let row = sqlx::query("SELECT role, school_id FROM user_profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let role: Option<String> = row.get("role");
            Profile {
                role: role.as_deref().and_then(UserRole::parse),
                school_id: row.get("school_id"),
            }
        }))
    }
}

#[async_trait]
impl ProgressSource for PrimaryDb {
    async fn fetch_progress(&self, filter: ProgressFilter) -> anyhow::Result<Vec<ProgressRecord>> {
        let mut query = String::from(
            "SELECT p.classroom_id, p.score, p.assignment_name, p.date_submitted, \
             c.id AS c_id, c.name AS c_name, c.school_id AS c_school_id, \
             c.subject AS c_subject, c.grade_level AS c_grade_level \
             FROM progress p \
             LEFT JOIN classrooms c ON c.id = p.classroom_id",
        );

        let id = match filter {
            ProgressFilter::Classroom(id) => {
                query.push_str(" WHERE p.classroom_id = $1");
                id
            }
            ProgressFilter::School(id) => {
                query.push_str(" WHERE p.school_id = $1");
                id
            }
        };
        query.push_str(" ORDER BY p.date_submitted, p.id");

        let rows = sqlx::query(&query)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .context("progress query failed")?;

        Ok(rows.iter().map(progress_from_row).collect())
    }

    async fn classroom_school(&self, classroom_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        let school_id = sqlx::query_scalar::<_, Uuid>("SELECT school_id FROM classrooms WHERE id = $1")
            .bind(classroom_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(school_id)
    }
}

fn progress_from_row(row: &PgRow) -> ProgressRecord {
    let classroom_ref_id: Option<Uuid> = row.get("c_id");
    let classroom_name: Option<String> = row.get("c_name");
    let classroom_school: Option<Uuid> = row.get("c_school_id");

    let classroom = match (classroom_ref_id, classroom_name, classroom_school) {
        (Some(id), Some(name), Some(school_id)) => Some(ClassroomRef {
            id,
            name,
            school_id,
            subject: row.get("c_subject"),
            grade_level: row.get("c_grade_level"),
        }),
        _ => None,
    };

    ProgressRecord {
        classroom_id: row.get("classroom_id"),
        score: row.get("score"),
        assignment_name: row.get("assignment_name"),
        date_submitted: row.get("date_submitted"),
        classroom,
    }
}

/// `class_averages` table in the analytics database.
#[derive(Clone)]
pub struct AnalyticsDb {
    pool: PgPool,
}

impl AnalyticsDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregateStore for AnalyticsDb {
    async fn replace(&self, aggregates: &[ClassroomAggregate]) -> Result<usize, StoreError> {
        if aggregates.is_empty() {
            return Ok(0);
        }

        let mut ids: Vec<Uuid> = aggregates.iter().map(|agg| agg.classroom_id).collect();
        ids.sort();
        ids.dedup();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        // Sorted lock order keeps overlapping recomputes from deadlocking.
        for id in &ids {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|err| StoreError::Write(format!("lock failed: {err}")))?;
        }

        sqlx::query("DELETE FROM class_averages WHERE classroom_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|err| StoreError::Write(format!("delete failed: {err}")))?;

        let mut insert: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO class_averages (classroom_id, classroom_name, school_id, subject, \
             grade_level, average_score, median_score, min_score, max_score, \
             assignment_count, calculated_at) ",
        );
        insert.push_values(aggregates, |mut values, agg| {
            values
                .push_bind(agg.classroom_id)
                .push_bind(&agg.classroom_name)
                .push_bind(agg.school_id)
                .push_bind(&agg.subject)
                .push_bind(&agg.grade_level)
                .push_bind(agg.average_score)
                .push_bind(agg.median_score)
                .push_bind(agg.min_score)
                .push_bind(agg.max_score)
                .push_bind(agg.assignment_count as i32)
                .push_bind(agg.calculated_at);
        });
        insert
            .build()
            .execute(&mut *tx)
            .await
            .map_err(|err| StoreError::Write(format!("insert failed: {err}")))?;

        tx.commit()
            .await
            .map_err(|err| StoreError::Write(format!("commit failed: {err}")))?;

        Ok(ids.len())
    }
}

pub async fn fetch_stored_aggregates(
    pool: &PgPool,
    school_id: Uuid,
) -> anyhow::Result<Vec<ClassroomAggregate>> {
    let rows = sqlx::query(
        r#"
        SELECT classroom_id, classroom_name, school_id, subject, grade_level,
               average_score, median_score, min_score, max_score,
               assignment_count, calculated_at
        FROM class_averages
        WHERE school_id = $1
        ORDER BY classroom_name
        "#,
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    let mut aggregates = Vec::new();
    for row in rows {
        let count: i32 = row.get("assignment_count");
        aggregates.push(ClassroomAggregate {
            classroom_id: row.get("classroom_id"),
            classroom_name: row.get("classroom_name"),
            school_id: row.get("school_id"),
            subject: row.get("subject"),
            grade_level: row.get("grade_level"),
            average_score: row.get("average_score"),
            median_score: row.get("median_score"),
            min_score: row.get("min_score"),
            max_score: row.get("max_score"),
            assignment_count: usize::try_from(count).unwrap_or_default(),
            calculated_at: row.get("calculated_at"),
        });
    }

    Ok(aggregates)
}

const SEED_SCHOOL: &str = "6f1c2b7e-3d5a-4b8e-9c21-7a4e0d9b1f30";
const SEED_ORPHAN_CLASSROOM: &str = "00000000-0000-4000-8000-00000000dead";

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let school_id = Uuid::parse_str(SEED_SCHOOL)?;
    sqlx::query("INSERT INTO schools (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
        .bind(school_id)
        .bind("Northfield Middle School")
        .execute(pool)
        .await?;

    let people = vec![
        (
            Uuid::parse_str("a8b3f0c4-51d2-4e6a-8f7b-2c9d4e1a6b01")?,
            "m.okafor@northfield.edu",
            "head_teacher",
            "Mira Okafor",
        ),
        (
            Uuid::parse_str("b2c7e9d1-6a4f-4b3c-9e8d-1f5a7c3b9d02")?,
            "d.hale@northfield.edu",
            "teacher",
            "Dev Hale",
        ),
        (
            Uuid::parse_str("c4d1a6e8-2b9f-4c7d-8a3e-5b6f1d9c2e03")?,
            "sam.rivera@northfield.edu",
            "student",
            "Sam Rivera",
        ),
        (
            Uuid::parse_str("d9e2b5f7-3c8a-4d1e-9b6f-4a7c2e8d1f04")?,
            "lee.tan@northfield.edu",
            "student",
            "Lee Tan",
        ),
    ];

    for (id, email, role, name) in &people {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (id, email, role, school_id, full_name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET role = EXCLUDED.role, full_name = EXCLUDED.full_name
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(role)
        .bind(school_id)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let teacher_id = people[1].0;
    let classrooms = vec![
        (
            Uuid::parse_str("e1f4c8a2-7d3b-4e9f-a6c5-3b8d2f7e1a05")?,
            "7A Mathematics",
            Some("Mathematics"),
            Some("7"),
        ),
        (
            Uuid::parse_str("f7a2d9c3-8e4b-4f1a-b7d6-4c9e3a8f2b06")?,
            "8B Biology",
            Some("Biology"),
            Some("8"),
        ),
    ];

    for (id, name, subject, grade) in &classrooms {
        sqlx::query(
            r#"
            INSERT INTO classrooms (id, name, school_id, teacher_id, subject, grade_level)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(school_id)
        .bind(teacher_id)
        .bind(subject)
        .bind(grade)
        .execute(pool)
        .await?;
    }

    let orphan = Uuid::parse_str(SEED_ORPHAN_CLASSROOM)?;
    let progress = vec![
        ("a0000000-0000-4000-8000-000000000001", classrooms[0].0, people[2].0, 80.0, "Fractions quiz", 3),
        ("a0000000-0000-4000-8000-000000000002", classrooms[0].0, people[3].0, 90.0, "Fractions quiz", 3),
        ("a0000000-0000-4000-8000-000000000003", classrooms[0].0, people[2].0, 100.0, "Ratios test", 1),
        ("a0000000-0000-4000-8000-000000000004", classrooms[1].0, people[2].0, 70.0, "Cell diagram", 5),
        ("a0000000-0000-4000-8000-000000000005", classrooms[1].0, people[3].0, 85.0, "Cell diagram", 5),
        ("a0000000-0000-4000-8000-000000000006", orphan, people[3].0, 42.0, "Archived essay", 40),
    ];

    for (id, classroom_id, student_id, score, assignment, days_ago) in progress {
        sqlx::query(
            r#"
            INSERT INTO progress
            (id, student_id, classroom_id, school_id, score, assignment_name, date_submitted)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(student_id)
        .bind(classroom_id)
        .bind(school_id)
        .bind(score)
        .bind(assignment)
        .bind(Utc::now() - chrono::Duration::days(days_ago))
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<(usize, usize)> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        classroom_id: Uuid,
        student_id: Uuid,
        score: f64,
        assignment_name: String,
        date_submitted: DateTime<Utc>,
        notes: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;
    let mut skipped = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", line + 1))?;

        // The school is taken from the classroom; unknown classrooms insert nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO progress
            (id, student_id, classroom_id, school_id, score, assignment_name, date_submitted, notes)
            SELECT $1, $2, c.id, c.school_id, $4, $5, $6, $7
            FROM classrooms c
            WHERE c.id = $3
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.student_id)
        .bind(row.classroom_id)
        .bind(row.score)
        .bind(&row.assignment_name)
        .bind(row.date_submitted)
        .bind(&row.notes)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        } else {
            tracing::warn!(classroom_id = %row.classroom_id, "skipping row for unknown classroom");
            skipped += 1;
        }
    }

    Ok((inserted, skipped))
}

pub fn seed_school() -> Uuid {
    Uuid::parse_str(SEED_SCHOOL).unwrap_or_else(|_| Uuid::nil())
}
